//! CLI commands implementation

pub mod detect;
pub mod ingest;
pub mod init;
pub mod query;
pub mod run;
pub mod status;
pub mod sync;
pub mod templates;

pub use detect::*;
pub use ingest::*;
pub use init::*;
pub use query::*;
pub use run::*;
pub use status::*;
pub use sync::*;
pub use templates::*;
