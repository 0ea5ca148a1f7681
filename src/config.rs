use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 核心配置
    #[serde(default)]
    pub core: CoreConfig,
    /// 词云插件配置
    #[serde(default)]
    pub word_cloud: WordCloudConfig,
}

/// 核心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 指令前缀（支持多个，如 ["/", "#"]）
    #[serde(default = "default_cmd_prefix")]
    pub cmd_prefix: Vec<String>,
    /// 数据目录
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// 数据库连接串
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 固定时区偏移（小时）
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset_hours: i32,
}

fn default_cmd_prefix() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_database_url() -> String {
    // mode=rwc 允许 读/写/创建
    "sqlite:data/bot.db?mode=rwc".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timezone_offset() -> i32 {
    8
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cmd_prefix: default_cmd_prefix(),
            data_dir: default_data_dir(),
            database_url: default_database_url(),
            log_level: default_log_level(),
            timezone_offset_hours: default_timezone_offset(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCloudConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    // === 渲染 ===
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// 超采样倍率，先按倍率渲染再缩小
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub font_path: Option<String>,
    /// "white" 或 "black"
    #[serde(default = "default_background")]
    pub background_color: String,
    #[serde(default)]
    pub colormap: Option<String>,
    #[serde(default)]
    pub mask_path: Option<String>,
    /// 白底时前景亮度上限 (0.0 - 1.0)
    #[serde(default = "default_max_brightness")]
    pub max_brightness: f32,
    /// 黑底时前景亮度下限 (0.0 - 1.0)
    #[serde(default = "default_min_brightness")]
    pub min_brightness: f32,
    #[serde(default = "default_true")]
    pub auto_crop: bool,

    // === 文本 ===
    #[serde(default = "default_max_msg")]
    pub max_msg: usize,
    #[serde(default)]
    pub stopwords_path: Option<String>,
    /// 额外加入分词词典的词
    #[serde(default)]
    pub user_words: Vec<String>,

    // === 缓存 ===
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_ttl_day")]
    pub ttl_day_hours: u64,
    #[serde(default = "default_ttl_week")]
    pub ttl_week_hours: u64,
    #[serde(default = "default_ttl_month")]
    pub ttl_month_hours: u64,
    #[serde(default = "default_ttl_quarter")]
    pub ttl_quarter_hours: u64,
    #[serde(default = "default_ttl_year")]
    pub ttl_year_hours: u64,
    #[serde(default = "default_max_memory_entries")]
    pub max_memory_entries: usize,
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: usize,

    // === 分词器资源池 ===
    #[serde(default = "default_pool_min")]
    pub pool_min_size: usize,
    #[serde(default = "default_pool_max")]
    pub pool_max_size: usize,
    #[serde(default = "default_pool_idle")]
    pub pool_max_idle_secs: u64,
    #[serde(default = "default_pool_use_count")]
    pub pool_max_use_count: u64,
    #[serde(default = "default_pool_resource_timeout")]
    pub pool_resource_timeout_secs: u64,
    #[serde(default = "default_pool_cleanup_interval")]
    pub pool_cleanup_interval_secs: u64,
    #[serde(default = "default_pool_max_errors")]
    pub pool_max_errors: u32,

    // === 任务队列 ===
    #[serde(default = "default_true")]
    pub use_task_queue: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_queue")]
    pub max_queue_size: usize,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_max_completed")]
    pub max_completed_tasks: usize,

    // === 定时推送 ===
    #[serde(default = "default_schedule_file")]
    pub schedule_file: String,
    /// 格式 "HH:MM"
    #[serde(default = "default_schedule_time")]
    pub default_schedule_time: String,
    /// 每次触发前的随机延迟上限，错开各群的生成
    #[serde(default = "default_jitter")]
    pub schedule_jitter_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_limit() -> usize {
    100
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

fn default_scale() -> f32 {
    2.0
}

fn default_background() -> String {
    "white".to_string()
}

fn default_max_brightness() -> f32 {
    0.75
}

fn default_min_brightness() -> f32 {
    0.45
}

fn default_max_msg() -> usize {
    50000
}

fn default_cache_dir() -> String {
    "data/word_cloud/cache".to_string()
}

fn default_ttl_day() -> u64 {
    1
}

fn default_ttl_week() -> u64 {
    6
}

fn default_ttl_month() -> u64 {
    12
}

fn default_ttl_quarter() -> u64 {
    24
}

fn default_ttl_year() -> u64 {
    48
}

fn default_max_memory_entries() -> usize {
    100
}

fn default_cleanup_threshold() -> usize {
    80
}

fn default_pool_min() -> usize {
    1
}

fn default_pool_max() -> usize {
    4
}

fn default_pool_idle() -> u64 {
    600
}

fn default_pool_use_count() -> u64 {
    1000
}

fn default_pool_resource_timeout() -> u64 {
    300
}

fn default_pool_cleanup_interval() -> u64 {
    60
}

fn default_pool_max_errors() -> u32 {
    3
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_queue() -> usize {
    50
}

fn default_task_timeout() -> u64 {
    120
}

fn default_max_completed() -> usize {
    200
}

fn default_schedule_file() -> String {
    "data/word_cloud/schedule.json".to_string()
}

fn default_schedule_time() -> String {
    "22:00".to_string()
}

fn default_jitter() -> u64 {
    300
}

impl Default for WordCloudConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: default_limit(),
            width: default_width(),
            height: default_height(),
            scale: default_scale(),
            font_path: None,
            background_color: default_background(),
            colormap: None,
            mask_path: None,
            max_brightness: default_max_brightness(),
            min_brightness: default_min_brightness(),
            auto_crop: true,
            max_msg: default_max_msg(),
            stopwords_path: None,
            user_words: Vec::new(),
            cache_dir: default_cache_dir(),
            ttl_day_hours: default_ttl_day(),
            ttl_week_hours: default_ttl_week(),
            ttl_month_hours: default_ttl_month(),
            ttl_quarter_hours: default_ttl_quarter(),
            ttl_year_hours: default_ttl_year(),
            max_memory_entries: default_max_memory_entries(),
            cleanup_threshold: default_cleanup_threshold(),
            pool_min_size: default_pool_min(),
            pool_max_size: default_pool_max(),
            pool_max_idle_secs: default_pool_idle(),
            pool_max_use_count: default_pool_use_count(),
            pool_resource_timeout_secs: default_pool_resource_timeout(),
            pool_cleanup_interval_secs: default_pool_cleanup_interval(),
            pool_max_errors: default_pool_max_errors(),
            use_task_queue: true,
            max_concurrent_tasks: default_max_concurrent(),
            max_queue_size: default_max_queue(),
            task_timeout_secs: default_task_timeout(),
            max_completed_tasks: default_max_completed(),
            schedule_file: default_schedule_file(),
            default_schedule_time: default_schedule_time(),
            schedule_jitter_secs: default_jitter(),
        }
    }
}

/// 配置管理器
pub struct ConfigManager {
    path: PathBuf,
    config: RwLock<AppConfig>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: RwLock::new(AppConfig::default()),
        }
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载配置，如果文件不存在则创建默认配置
    pub async fn load(&self) -> anyhow::Result<AppConfig> {
        if !self.path.exists() {
            let default_cfg = AppConfig::default();
            self.save_atomic(&default_cfg).await?;
            return Ok(default_cfg);
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("读取配置文件失败: {}", self.path.display()))?;
        let cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", self.path.display()))?;

        *self.config.write().await = cfg.clone();
        Ok(cfg)
    }

    /// 原子写入配置（写临时文件 -> Rename 覆盖）
    pub async fn save_atomic(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(cfg)?;
        write_atomic(self.path.clone(), content.into_bytes()).await?;

        *self.config.write().await = cfg.clone();
        Ok(())
    }

    /// 更新配置（会自动保存）
    pub async fn update<F>(&self, f: F) -> anyhow::Result<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut cfg = self.config.write().await;
        f(&mut cfg);
        let new_cfg = cfg.clone();
        drop(cfg); // 释放锁

        self.save_atomic(&new_cfg).await?;
        Ok(new_cfg)
    }
}

/// 在阻塞线程中写临时文件并 rename 覆盖目标
pub async fn write_atomic(path: PathBuf, content: Vec<u8>) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        // 确保父目录存在
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&content)?;
        file.sync_all()?; // 确保落盘
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}
