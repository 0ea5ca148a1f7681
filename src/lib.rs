// lib.rs
//
// 群聊词云服务
// 聊天记录入库，按时间范围生成词云图片，支持缓存、任务队列与每日定时推送。

pub mod config;
pub mod db;
pub mod error;
pub mod log;
pub mod message;
pub mod pool;
pub mod scheduler;
pub mod task;
pub mod word_cloud;

pub use error::{Result, WordCloudError};
pub use message::Message;

pub mod prelude {
    pub use crate::config::{AppConfig, ConfigManager};
    pub use crate::error::{Result, WordCloudError};
    pub use crate::message::Message;
    pub use crate::word_cloud::{
        Command, DbMessageSource, HandleOutcome, MessageSink, Period, Scope, TimeSpec,
        WordCloudRequest, WordCloudService, parse_command,
    };
    pub use async_trait::async_trait;
}
