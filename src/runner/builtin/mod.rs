//! Builtin task runners shipped with every worker.

pub mod http;
pub mod mail;
pub mod shell;
pub mod template;

pub use http::HttpRunner;
pub use mail::{MailRunner, SmtpConfig};
pub use shell::ShellRunner;
pub use template::TemplateRunner;
