use base64::{Engine as _, engine::general_purpose};
use serde::Serialize;
use serde_json::{Map, Value};

/// 消息段 (Segment)
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Segment {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: Map<String, Value>,
}

impl Segment {
    pub fn new(type_: &str, data: Map<String, Value>) -> Self {
        Self {
            type_: type_.to_string(),
            data,
        }
    }
}

/// 消息链 (Message Chain)
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct Message(Vec<Segment>);

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通用添加方法：手动构建 Segment
    pub fn add(mut self, type_: &str, data: Map<String, Value>) -> Self {
        self.0.push(Segment::new(type_, data));
        self
    }

    /// 纯文本
    pub fn text(self, text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text".into(), Value::from(text.into()));
        self.add("text", data)
    }

    /// 图片
    /// - `file`: 图片文件名、URL、Base64 或文件路径
    pub fn image(self, file: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("file".into(), Value::from(file.into()));
        self.add("image", data)
    }

    /// PNG 字节直接编码为 base64:// 图片段
    pub fn image_bytes(self, png: &[u8]) -> Self {
        let b64 = general_purpose::STANDARD.encode(png);
        self.image(format!("base64://{}", b64))
    }

    /// 回复消息
    pub fn reply(self, message_id: impl ToString) -> Self {
        let mut data = Map::new();
        data.insert("id".into(), Value::from(message_id.to_string()));
        self.add("reply", data)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// 拼接所有文本段
    pub fn plain_text(&self) -> String {
        self.0
            .iter()
            .filter(|s| s.type_ == "text")
            .filter_map(|s| s.data.get("text").and_then(Value::as_str))
            .collect()
    }

    /// 取出所有 base64 图片段并解码
    pub fn images(&self) -> Vec<Vec<u8>> {
        self.0
            .iter()
            .filter(|s| s.type_ == "image")
            .filter_map(|s| s.data.get("file").and_then(Value::as_str))
            .filter_map(|f| f.strip_prefix("base64://"))
            .filter_map(|b64| general_purpose::STANDARD.decode(b64).ok())
            .collect()
    }
}

// 允许直接从字符串字面量转换为纯文本消息
impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new().text(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::new().text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_chain_in_order() {
        let msg = Message::new().reply(7).text("📊 ").text("本群今日词云").image_bytes(&[1, 2, 3]);

        let types: Vec<&str> = msg.segments().iter().map(|s| s.type_.as_str()).collect();
        assert_eq!(types, ["reply", "text", "text", "image"]);
        assert_eq!(msg.plain_text(), "📊 本群今日词云");
        assert_eq!(msg.images(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn serializes_like_onebot_segments() {
        let json = serde_json::to_string(&Message::from("hi")).unwrap();
        assert_eq!(json, r#"[{"type":"text","data":{"text":"hi"}}]"#);
    }
}
