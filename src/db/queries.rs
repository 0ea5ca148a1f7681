use super::entity::{self, Entity as MessageLogs};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, QuerySelect, Select, Set,
};

// ================= 常量定义 =================

const MAX_TEXT_CORPUS_LIMIT: u64 = 50000;

/// 纯文本数据（用于生成词云）
#[derive(Debug, FromQueryResult)]
pub struct TextData {
    pub content_text: String,
}

fn corpus_query(
    group_id: i64,
    user_id: Option<i64>,
    start_time: i64,
    end_time: i64,
) -> Select<MessageLogs> {
    let mut query = MessageLogs::find()
        .select_only()
        .column(entity::Column::ContentText)
        .filter(entity::Column::GroupId.eq(group_id))
        .filter(entity::Column::Time.gte(start_time))
        .filter(entity::Column::Time.lt(end_time))
        .filter(entity::Column::ContentText.ne(""));

    if let Some(uid) = user_id {
        query = query.filter(entity::Column::UserId.eq(uid));
    }
    query
}

/// 获取指定时间范围内的纯文本内容列表
///
/// 超过 `limit` 时保留最新的消息，返回结果按时间正序。
pub async fn get_text_corpus(
    db: &DatabaseConnection,
    group_id: i64,
    user_id: Option<i64>,
    start_time: i64,
    end_time: i64,
    limit: u64,
) -> Result<Vec<String>, DbErr> {
    let limit = if limit == 0 {
        MAX_TEXT_CORPUS_LIMIT
    } else {
        limit.min(MAX_TEXT_CORPUS_LIMIT)
    };

    let results: Vec<TextData> = corpus_query(group_id, user_id, start_time, end_time)
        .order_by_desc(entity::Column::Time)
        .order_by_desc(entity::Column::Id)
        .limit(limit)
        .into_model()
        .all(db)
        .await?;

    Ok(results.into_iter().rev().map(|d| d.content_text).collect())
}

/// 分块读取文本，按时间正序
pub async fn get_text_chunk(
    db: &DatabaseConnection,
    group_id: i64,
    user_id: Option<i64>,
    start_time: i64,
    end_time: i64,
    offset: u64,
    chunk_size: u64,
) -> Result<Vec<String>, DbErr> {
    let results: Vec<TextData> = corpus_query(group_id, user_id, start_time, end_time)
        .order_by_asc(entity::Column::Time)
        .order_by_asc(entity::Column::Id)
        .offset(offset)
        .limit(chunk_size)
        .into_model()
        .all(db)
        .await?;

    Ok(results.into_iter().map(|d| d.content_text).collect())
}

/// 写入一条聊天记录
pub async fn insert_message(
    db: &DatabaseConnection,
    group_id: i64,
    user_id: i64,
    content_text: &str,
    time: i64,
) -> Result<(), DbErr> {
    entity::ActiveModel {
        group_id: Set(group_id),
        user_id: Set(user_id),
        content_text: Set(content_text.to_string()),
        time: Set(time),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn memory_db() -> DatabaseConnection {
        let conn = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        db::init_tables(&conn).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn corpus_filters_group_user_and_time() {
        let conn = memory_db().await;
        insert_message(&conn, 1, 10, "早上好", 100).await.unwrap();
        insert_message(&conn, 1, 11, "吃了吗", 150).await.unwrap();
        insert_message(&conn, 1, 10, "", 160).await.unwrap();
        insert_message(&conn, 2, 10, "别的群", 170).await.unwrap();
        insert_message(&conn, 1, 10, "太晚了", 300).await.unwrap();

        let all = get_text_corpus(&conn, 1, None, 100, 300, 0).await.unwrap();
        assert_eq!(all, vec!["早上好", "吃了吗"]);

        let mine = get_text_corpus(&conn, 1, Some(10), 0, 1000, 0).await.unwrap();
        assert_eq!(mine, vec!["早上好", "太晚了"]);
    }

    #[tokio::test]
    async fn corpus_limit_keeps_newest() {
        let conn = memory_db().await;
        for i in 0..5 {
            insert_message(&conn, 1, 10, &format!("消息{}", i), i).await.unwrap();
        }

        let latest = get_text_corpus(&conn, 1, None, 0, 100, 2).await.unwrap();
        assert_eq!(latest, vec!["消息3", "消息4"]);
    }

    #[tokio::test]
    async fn chunks_walk_in_order() {
        let conn = memory_db().await;
        for i in 0..5 {
            insert_message(&conn, 1, 10, &format!("消息{}", i), i).await.unwrap();
        }

        let first = get_text_chunk(&conn, 1, None, 0, 100, 0, 2).await.unwrap();
        let last = get_text_chunk(&conn, 1, None, 0, 100, 4, 2).await.unwrap();
        assert_eq!(first, vec!["消息0", "消息1"]);
        assert_eq!(last, vec!["消息4"]);
    }
}
