use log::info;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use std::path::Path;
use tokio::fs;

pub mod entity;
pub mod queries;

/// 初始化数据库连接
pub async fn init(db_url: &str, data_dir: &str) -> Result<DatabaseConnection, DbErr> {
    if !Path::new(data_dir).exists() {
        let _ = fs::create_dir_all(data_dir).await;
    }

    let db = Database::connect(db_url).await?;

    info!(target: "Database", "连接成功: {}", db_url);

    Ok(db)
}

/// 建立聊天记录表（已存在则跳过）
pub async fn init_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut create_table_stmt = schema.create_table_from_entity(entity::Entity);
    create_table_stmt.if_not_exists();
    db.execute(builder.build(&create_table_stmt)).await?;

    let idx = sea_orm::sea_query::Index::create()
        .name("idx_message_records_group_time")
        .table(entity::Entity)
        .col(entity::Column::GroupId)
        .col(entity::Column::Time)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&idx)).await?;

    Ok(())
}
