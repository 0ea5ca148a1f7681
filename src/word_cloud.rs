//! 群聊词云：查询聊天记录 → 分词统计 → 渲染 → 缓存与推送

pub mod cache;
pub mod command;
pub mod data;
pub mod handler;
pub mod image;
pub mod schedule;
pub mod service;
pub mod stopwords;
pub mod text;
pub mod time;

pub use cache::{PeriodType, WordCloudCache, WordCloudTaskParams};
pub use command::{Command, parse_command};
pub use data::{DataService, DbMessageSource, MessageData, MessageQuery, MessageSource};
pub use handler::{CloudHandler, HandleOutcome, MessageSink, Scope, TimeSpec, WordCloudRequest};
pub use image::WordCloudGenerator;
pub use schedule::ScheduleManager;
pub use service::WordCloudService;
pub use text::{SegmenterPool, TextProcessor};
pub use time::{Period, TimeRange};
