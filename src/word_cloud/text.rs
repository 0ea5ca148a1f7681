use super::stopwords::StopWords;
use crate::error::{Result, WordCloudError};
use crate::pool::{AsyncResourcePool, ResourceFactory};
use async_trait::async_trait;
use jieba_rs::Jieba;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

const TARGET: &str = "WordCloud/Text";

/// 分词器资源池
pub type SegmenterPool = AsyncResourcePool<Jieba>;

/// 创建 Jieba 实例，加载词典是阻塞操作
pub struct JiebaFactory {
    user_words: Vec<String>,
}

impl JiebaFactory {
    pub fn new(user_words: Vec<String>) -> Self {
        Self { user_words }
    }
}

#[async_trait]
impl ResourceFactory<Jieba> for JiebaFactory {
    async fn create(&self) -> anyhow::Result<Jieba> {
        let user_words = self.user_words.clone();
        let jieba = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let mut jieba = Jieba::new();
            for word in user_words.iter().map(|w| w.trim()).filter(|w| !w.is_empty()) {
                // 给自定义词足够高的词频，保证不被拆开
                jieba.add_word(word, Some(100_000), None);
            }
            debug!(target: TARGET, "Jieba 初始化耗时 {:?}", start.elapsed());
            jieba
        })
        .await?;
        Ok(jieba)
    }
}

static URL_REGEX: OnceLock<Regex> = OnceLock::new();
static CQ_REGEX: OnceLock<Regex> = OnceLock::new();
static EMOJI_REGEX: OnceLock<Regex> = OnceLock::new();

fn url_regex() -> &'static Regex {
    URL_REGEX.get_or_init(|| {
        Regex::new(r"(?i)(?:https?://|www\.)[A-Za-z0-9\-._~:/?#\[\]@!$&'()*+,;=%]+")
            .expect("url regex")
    })
}

fn cq_regex() -> &'static Regex {
    CQ_REGEX.get_or_init(|| Regex::new(r"\[CQ:[^\]]*\]").expect("cq regex"))
}

fn emoji_regex() -> &'static Regex {
    EMOJI_REGEX.get_or_init(|| {
        Regex::new(
            r"[\x{1F000}-\x{1FAFF}\x{2600}-\x{27BF}\x{2B00}-\x{2BFF}\x{1F1E6}-\x{1F1FF}\x{FE00}-\x{FE0F}\x{E0020}-\x{E007F}]",
        )
        .expect("emoji regex")
    })
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

/// 清理单条消息，无有效内容时返回 None
pub fn clean_message(text: &str) -> Option<String> {
    let text: String = text.chars().filter(|c| !is_zero_width(*c)).collect();
    let text = cq_regex().replace_all(&text, " ");
    let text = url_regex().replace_all(&text, " ");
    let text = emoji_regex().replace_all(&text, "");
    let text = text.trim();

    // 只剩符号的消息没有意义
    if text.is_empty() || !text.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(text.to_string())
}

fn is_candidate(word: &str, stop_words: &StopWords) -> bool {
    // 过滤规则：长度>1，不在停用词表，非纯数字/标点
    word.chars().count() > 1
        && !stop_words.contains(word)
        && !word
            .chars()
            .all(|c| c.is_numeric() || c.is_ascii_punctuation() || c.is_whitespace())
}

/// 每条消息内去重后累加，刷屏的词在一条消息里只算一次
pub fn count_words(
    jieba: &Jieba,
    messages: &[String],
    stop_words: &StopWords,
) -> HashMap<String, u32> {
    let mut freq: HashMap<String, u32> = HashMap::new();
    for msg in messages {
        let unique: HashSet<&str> = jieba
            .cut(msg, true)
            .into_iter()
            .map(str::trim)
            .filter(|w| is_candidate(w, stop_words))
            .collect();
        for word in unique {
            *freq.entry(word.to_string()).or_insert(0) += 1;
        }
    }
    freq
}

/// 按词频降序取前 `limit` 个，同频按字典序
pub fn top_words(freq: &HashMap<String, u32>, limit: usize) -> Vec<(String, u32)> {
    let mut words: Vec<(String, u32)> = freq.iter().map(|(w, c)| (w.clone(), *c)).collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(limit);
    words
}

/// 文本预处理与关键词提取
pub struct TextProcessor {
    pool: SegmenterPool,
    stop_words: Arc<StopWords>,
    cmd_prefixes: Vec<String>,
}

impl TextProcessor {
    pub fn new(pool: SegmenterPool, stop_words: StopWords, cmd_prefixes: Vec<String>) -> Self {
        Self {
            pool,
            stop_words: Arc::new(stop_words),
            cmd_prefixes: cmd_prefixes.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }

    pub fn pool(&self) -> &SegmenterPool {
        &self.pool
    }

    fn is_command(&self, text: &str) -> bool {
        let trimmed = text.trim_start();
        self.cmd_prefixes.iter().any(|p| trimmed.starts_with(p.as_str()))
    }

    /// 去掉指令、链接、CQ 码、零宽字符与 emoji，丢弃空消息与纯符号消息
    pub fn preprocess(&self, messages: &[String]) -> Vec<String> {
        messages
            .iter()
            .filter(|m| !self.is_command(m))
            .filter_map(|m| clean_message(m))
            .collect()
    }

    /// 分词并统计词频
    pub async fn extract_keywords(&self, messages: Vec<String>) -> Result<HashMap<String, u32>> {
        if messages.is_empty() {
            return Ok(HashMap::new());
        }

        let start = Instant::now();
        let stop_words = self.stop_words.clone();
        let total = messages.len();
        let freq = self
            .with_segmenter(move |jieba| count_words(jieba, &messages, &stop_words))
            .await?;

        info!(
            target: TARGET,
            "分词完成: {} 条消息, {} 个词, 耗时 {:?}",
            total,
            freq.len(),
            start.elapsed()
        );
        Ok(freq)
    }

    /// 借出一个分词器在阻塞线程中执行 `job`，出错的实例会被标记，累计到阈值后淘汰
    async fn with_segmenter<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Jieba) -> R + Send + 'static,
    {
        let jieba = self.pool.acquire().await?;
        let (mut jieba, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| job(&jieba)));
            (jieba, outcome)
        })
        .await
        .map_err(|e| WordCloudError::Pool(format!("分词任务异常: {}", e)))?;

        if outcome.is_err() {
            jieba.mark_error();
        }
        self.pool.release(jieba).await;

        outcome.map_err(|_| {
            warn!(target: TARGET, "分词过程中发生 panic，已标记该分词器");
            WordCloudError::Pool("分词任务异常".to_string())
        })
    }
}
