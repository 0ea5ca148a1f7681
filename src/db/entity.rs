use sea_orm::entity::prelude::*;

/// 聊天记录，只保留生成词云需要的字段
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "message_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub group_id: i64,
    pub user_id: i64,
    pub content_text: String,
    /// Unix 秒
    pub time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
