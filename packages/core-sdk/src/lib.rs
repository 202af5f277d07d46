pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod protocol;
pub mod reply;
pub mod server;
pub mod telemetry;

pub use error::LlmError;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::db;
    pub use crate::error::LlmError;
    pub use crate::llm;
    pub use crate::models::{ClientFormat, LlmConfig, Message, NodeInfo, NodeInput, Role};
    pub use crate::reply;
    pub use crate::server;
    pub use crate::telemetry;
}
