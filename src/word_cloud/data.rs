use super::time::TimeRange;
use crate::db;
use crate::error::Result;
use async_trait::async_trait;
use futures_util::Stream;
use futures_util::stream;
use log::debug;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Instant;

/// 查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub group_id: i64,
    pub user_id: Option<i64>,
    pub range: TimeRange,
}

/// 一次查询取到的消息文本
#[derive(Debug, Clone)]
pub struct MessageData {
    pub messages: Vec<String>,
    pub group_id: i64,
    pub user_id: Option<i64>,
    pub range: TimeRange,
}

impl MessageData {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// 聊天记录来源
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    /// 取最新的至多 `limit` 条，按时间正序返回
    async fn fetch(&self, query: &MessageQuery, limit: u64) -> Result<Vec<String>>;

    /// 按时间正序分块读取
    async fn fetch_chunk(
        &self,
        query: &MessageQuery,
        offset: u64,
        chunk_size: u64,
    ) -> Result<Vec<String>>;
}

pub struct DataService {
    source: Arc<dyn MessageSource>,
    max_msg: usize,
}

impl DataService {
    pub fn new(source: Arc<dyn MessageSource>, max_msg: usize) -> Self {
        Self { source, max_msg }
    }

    /// 一次性读取，超出上限时保留最新的消息
    pub async fn get_messages(&self, query: &MessageQuery) -> Result<MessageData> {
        let start = Instant::now();
        let messages = self.source.fetch(query, self.max_msg as u64).await?;
        debug!(
            target: "Database",
            "群 {} 用户 {:?} 读取 {} 条消息，耗时 {:?}",
            query.group_id,
            query.user_id,
            messages.len(),
            start.elapsed()
        );

        Ok(MessageData {
            messages,
            group_id: query.group_id,
            user_id: query.user_id,
            range: query.range,
        })
    }

    /// 分块流式读取，读到不足一块即结束
    pub fn stream_messages(
        &self,
        query: MessageQuery,
        chunk_size: u64,
    ) -> impl Stream<Item = Result<Vec<String>>> + Send + 'static {
        let source = self.source.clone();
        let chunk_size = chunk_size.max(1);

        stream::unfold(Some(0u64), move |offset| {
            let source = source.clone();
            let query = query.clone();
            async move {
                let offset = offset?;
                match source.fetch_chunk(&query, offset, chunk_size).await {
                    Ok(chunk) if chunk.is_empty() => None,
                    Ok(chunk) => {
                        let read = chunk.len() as u64;
                        let next = (read == chunk_size).then_some(offset + read);
                        Some((Ok(chunk), next))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
    }
}

/// 基于 sea-orm 的聊天记录来源
pub struct DbMessageSource {
    db: DatabaseConnection,
}

impl DbMessageSource {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn init_table(&self) -> Result<()> {
        db::init_tables(&self.db).await?;
        Ok(())
    }

    pub async fn record(&self, group_id: i64, user_id: i64, text: &str, time: i64) -> Result<()> {
        db::queries::insert_message(&self.db, group_id, user_id, text, time).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSource for DbMessageSource {
    async fn fetch(&self, query: &MessageQuery, limit: u64) -> Result<Vec<String>> {
        Ok(db::queries::get_text_corpus(
            &self.db,
            query.group_id,
            query.user_id,
            query.range.start_ts(),
            query.range.stop_ts(),
            limit,
        )
        .await?)
    }

    async fn fetch_chunk(
        &self,
        query: &MessageQuery,
        offset: u64,
        chunk_size: u64,
    ) -> Result<Vec<String>> {
        Ok(db::queries::get_text_chunk(
            &self.db,
            query.group_id,
            query.user_id,
            query.range.start_ts(),
            query.range.stop_ts(),
            offset,
            chunk_size,
        )
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word_cloud::time::{fixed_offset, resolve_date_range};
    use futures_util::StreamExt;

    async fn seeded() -> Arc<DbMessageSource> {
        let conn = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        let source = DbMessageSource::new(conn);
        source.init_table().await.unwrap();

        let range = resolve_date_range("2024-05-01", "2024-05-01", fixed_offset(8)).unwrap();
        for i in 0..7 {
            source
                .record(1, 10 + i % 2, &format!("消息{}", i), range.start_ts() + i)
                .await
                .unwrap();
        }
        source
            .record(1, 10, "前一天", range.start_ts() - 1)
            .await
            .unwrap();
        Arc::new(source)
    }

    fn query(user_id: Option<i64>) -> MessageQuery {
        MessageQuery {
            group_id: 1,
            user_id,
            range: resolve_date_range("2024-05-01", "2024-05-01", fixed_offset(8)).unwrap(),
        }
    }

    #[tokio::test]
    async fn bulk_read_keeps_newest_within_cap() {
        let service = DataService::new(seeded().await, 3);
        let data = service.get_messages(&query(None)).await.unwrap();
        assert_eq!(data.messages, vec!["消息4", "消息5", "消息6"]);
        assert_eq!(data.group_id, 1);

        let mine = DataService::new(seeded().await, 100)
            .get_messages(&query(Some(11)))
            .await
            .unwrap();
        assert_eq!(mine.messages, vec!["消息1", "消息3", "消息5"]);
    }

    #[tokio::test]
    async fn stream_yields_all_chunks_in_order() {
        let service = DataService::new(seeded().await, 100);
        let chunks: Vec<Vec<String>> = service
            .stream_messages(query(None), 3)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], vec!["消息6"]);
        let flat: Vec<String> = chunks.into_iter().flatten().collect();
        assert_eq!(flat.len(), 7);
        assert_eq!(flat[0], "消息0");
    }
}
