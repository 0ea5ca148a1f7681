use log::{info, warn};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

const BUILTIN_STOP_WORDS: &str = include_str!("../../res/stopwords.txt");

static STOP_WORDS: OnceLock<HashSet<String>> = OnceLock::new();

fn parse_lines(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_lowercase())
}

/// 内置停用词表
pub fn get_stop_words() -> &'static HashSet<String> {
    STOP_WORDS.get_or_init(|| parse_lines(BUILTIN_STOP_WORDS).collect())
}

/// 内置停用词 + 用户停用词文件
#[derive(Debug, Clone)]
pub struct StopWords {
    words: HashSet<String>,
}

impl StopWords {
    pub fn builtin() -> Self {
        Self {
            words: get_stop_words().clone(),
        }
    }

    /// 读取用户文件（每行一个词），文件缺失只记警告
    pub fn load(extra_path: Option<&str>) -> Self {
        let mut stop_words = Self::builtin();
        let Some(path) = extra_path else {
            return stop_words;
        };

        match std::fs::read_to_string(Path::new(path)) {
            Ok(content) => {
                let before = stop_words.words.len();
                stop_words.words.extend(parse_lines(&content));
                info!(
                    target: "WordCloud/Text",
                    "已加载用户停用词 {} 个: {}",
                    stop_words.words.len() - before,
                    path
                );
            }
            Err(e) => warn!(target: "WordCloud/Text", "读取停用词文件失败: {} - {}", path, e),
        }
        stop_words
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, words: I) {
        self.words.extend(words.into_iter().map(|w| w.to_lowercase()));
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for StopWords {
    fn default() -> Self {
        Self::builtin()
    }
}
