use thiserror::Error;

/// 词云服务统一错误类型
///
/// 每个变体都能给出一条可以直接发回聊天的简短提示，见 [`WordCloudError::user_message`]。
#[derive(Debug, Error)]
pub enum WordCloudError {
    #[error("参数错误: {0}")]
    InvalidArgs(String),

    #[error("没有足够的消息记录")]
    NoData,

    #[error("有效词汇为空（可能被过滤）")]
    NoWords,

    #[error("数据库错误: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("渲染失败: {0}")]
    Render(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("资源池错误: {0}")]
    Pool(String),

    #[error("任务队列已满")]
    QueueFull,

    #[error("定时任务错误: {0}")]
    Schedule(String),

    #[error("消息发送失败: {0}")]
    Send(String),
}

impl WordCloudError {
    /// 面向用户的提示文本
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidArgs(msg) => format!("参数错误：{}", msg),
            Self::NoData => "生成失败：该时间范围内没有足够的消息记录。".to_string(),
            Self::NoWords => "生成失败：有效词汇为空。".to_string(),
            Self::Database(_) => "获取聊天记录失败，请稍后再试。".to_string(),
            Self::Render(_) => "生成词云图片失败。".to_string(),
            Self::QueueFull => "当前生成任务过多，请稍后再试。".to_string(),
            Self::Schedule(msg) => format!("定时设置失败：{}", msg),
            Self::Io(_) | Self::Serde(_) | Self::Pool(_) | Self::Send(_) => {
                "词云生成出错，请稍后再试。".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, WordCloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_hides_internal_detail() {
        let err = WordCloudError::Render("PNG Encode Error: oops".to_string());
        assert_eq!(err.user_message(), "生成词云图片失败。");
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn invalid_args_keeps_reason() {
        let err = WordCloudError::InvalidArgs("开始日期晚于结束日期".to_string());
        assert!(err.user_message().contains("开始日期晚于结束日期"));
    }
}
