use super::time::{Period, TimeRange};
use crate::config::{WordCloudConfig, write_atomic};
use crate::error::Result;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const TARGET: &str = "WordCloud/Cache";
const CACHE_EXT: &str = "cache";

/// 缓存分桶类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Day,
    Week,
    Month,
    Quarter,
    Year,
    Custom,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Day => "day",
            PeriodType::Week => "week",
            PeriodType::Month => "month",
            PeriodType::Quarter => "quarter",
            PeriodType::Year => "year",
            PeriodType::Custom => "custom",
        }
    }

    /// 口语化时间的显式分桶，滚动窗口归为 Custom
    pub fn from_period(period: Period) -> Self {
        match period {
            Period::Today | Period::Yesterday => PeriodType::Day,
            Period::ThisWeek | Period::LastWeek => PeriodType::Week,
            Period::ThisMonth | Period::LastMonth => PeriodType::Month,
            Period::ThisQuarter => PeriodType::Quarter,
            Period::ThisYear | Period::LastYear => PeriodType::Year,
            Period::Last7Days | Period::Last30Days | Period::All => PeriodType::Custom,
        }
    }
}

/// 根据起点与跨度推断分桶类型，不会返回 Custom
pub fn infer_period_type(range: &TimeRange) -> PeriodType {
    let start = range.start.date_naive();
    let span_days = range.span().num_days();

    if (start.month() == 1 && start.day() == 1) || span_days >= 300 {
        PeriodType::Year
    } else if start.day() == 1 && start.month0() % 3 == 0 && span_days > 31 {
        PeriodType::Quarter
    } else if start.day() == 1 {
        PeriodType::Month
    } else if start.weekday() == Weekday::Mon || span_days >= 7 {
        PeriodType::Week
    } else {
        PeriodType::Day
    }
}

/// 各分桶的缓存时长
#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub day: Duration,
    pub week: Duration,
    pub month: Duration,
    pub quarter: Duration,
    pub year: Duration,
}

impl CacheTtl {
    pub fn from_config(cfg: &WordCloudConfig) -> Self {
        let hours = |h: u64| Duration::from_secs(h * 3600);
        Self {
            day: hours(cfg.ttl_day_hours),
            week: hours(cfg.ttl_week_hours),
            month: hours(cfg.ttl_month_hours),
            quarter: hours(cfg.ttl_quarter_hours),
            year: hours(cfg.ttl_year_hours),
        }
    }

    fn of(&self, period_type: PeriodType) -> Duration {
        match period_type {
            PeriodType::Day | PeriodType::Custom => self.day,
            PeriodType::Week => self.week,
            PeriodType::Month => self.month,
            PeriodType::Quarter => self.quarter,
            PeriodType::Year => self.year,
        }
    }
}

/// 一次生成请求的寻址信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordCloudTaskParams {
    pub group_id: i64,
    pub user_id: Option<i64>,
    /// 结果发往何处
    pub target: String,
    pub period_type: PeriodType,
    pub range: TimeRange,
    /// 范围包含今天，数据仍在增长
    pub is_today: bool,
}

impl WordCloudTaskParams {
    /// 由口语化时间构造，分桶由时间描述直接决定
    pub fn for_period(
        group_id: i64,
        user_id: Option<i64>,
        target: impl Into<String>,
        period: Period,
        range: TimeRange,
        now: DateTime<FixedOffset>,
    ) -> Self {
        Self::build(group_id, user_id, target.into(), PeriodType::from_period(period), range, now)
    }

    /// 由日期区间构造，键按起止日期区分
    pub fn for_range(
        group_id: i64,
        user_id: Option<i64>,
        target: impl Into<String>,
        range: TimeRange,
        now: DateTime<FixedOffset>,
    ) -> Self {
        Self::build(group_id, user_id, target.into(), PeriodType::Custom, range, now)
    }

    fn build(
        group_id: i64,
        user_id: Option<i64>,
        target: String,
        period_type: PeriodType,
        range: TimeRange,
        now: DateTime<FixedOffset>,
    ) -> Self {
        let today_start = now.date_naive().and_time(NaiveTime::MIN);
        let is_today = range.stop.with_timezone(now.offset()).naive_local() > today_start;
        Self {
            group_id,
            user_id,
            target,
            period_type,
            range,
            is_today,
        }
    }

    /// 分桶标识：日 `YYYY-MM-DD`，周 `YYYY-Www`，月 `YYYY-MM`，季 `YYYY-Qn`，年 `YYYY`
    pub fn period_id(&self) -> String {
        let start = self.range.start.date_naive();
        match self.period_type {
            PeriodType::Day => start.format("%Y-%m-%d").to_string(),
            PeriodType::Week => {
                let week = start.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            PeriodType::Month => start.format("%Y-%m").to_string(),
            PeriodType::Quarter => format!("{}-Q{}", start.year(), start.month0() / 3 + 1),
            PeriodType::Year => start.format("%Y").to_string(),
            PeriodType::Custom => format!(
                "{}_{}",
                start.format("%Y%m%d"),
                self.range.stop.date_naive().format("%Y%m%d")
            ),
        }
    }

    pub fn cache_key(&self) -> String {
        let user = self
            .user_id
            .map(|u| u.to_string())
            .unwrap_or_else(|| "all".to_string());
        let raw = format!(
            "{}_{}_{}_{}",
            user,
            self.group_id,
            self.period_type.as_str(),
            self.period_id()
        );
        format!("{:x}", md5::compute(raw.as_bytes()))
    }

    /// 自定义区间按跨度套用对应分桶的时长
    pub fn ttl(&self, ttl: &CacheTtl) -> Duration {
        match self.period_type {
            PeriodType::Custom => ttl.of(infer_period_type(&self.range)),
            other => ttl.of(other),
        }
    }

    pub fn meta(&self) -> CacheMeta {
        CacheMeta {
            group_id: Some(self.group_id),
            user_id: self.user_id,
            period: format!("{}:{}", self.period_type.as_str(), self.period_id()),
        }
    }
}

/// 条目附带的寻址信息，用于按群失效
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub group_id: Option<i64>,
    pub user_id: Option<i64>,
    pub period: String,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Arc<Vec<u8>>,
    /// Unix 秒
    pub expire_time: i64,
    pub create_time: i64,
    pub meta: CacheMeta,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expire_time
    }
}

/// 磁盘上的条目格式
#[derive(Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    data: String,
    expire_time: i64,
    create_time: i64,
    #[serde(default)]
    meta: CacheMeta,
}

impl DiskEntry {
    fn from_entry(key: &str, entry: &CacheEntry) -> Self {
        Self {
            key: key.to_string(),
            data: general_purpose::STANDARD.encode(entry.data.as_slice()),
            expire_time: entry.expire_time,
            create_time: entry.create_time,
            meta: entry.meta.clone(),
        }
    }

    fn into_entry(self) -> Option<CacheEntry> {
        let data = general_purpose::STANDARD.decode(self.data).ok()?;
        Some(CacheEntry {
            data: Arc::new(data),
            expire_time: self.expire_time,
            create_time: self.create_time,
            meta: self.meta,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// 内存 + 磁盘两级缓存
pub struct WordCloudCache {
    dir: PathBuf,
    max_entries: usize,
    cleanup_threshold: usize,
    memory: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl WordCloudCache {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize, cleanup_threshold: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            dir: dir.into(),
            max_entries,
            cleanup_threshold: cleanup_threshold.clamp(1, max_entries),
            memory: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(cfg: &WordCloudConfig) -> Self {
        Self::new(&cfg.cache_dir, cfg.max_memory_entries, cfg.cleanup_threshold)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, CACHE_EXT))
    }

    /// 读取缓存，过期条目在两级中一并删除
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let now = Utc::now().timestamp();

        let cached = self.memory.lock().get(key).cloned();
        if let Some(entry) = cached {
            if !entry.is_expired_at(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data);
            }
            debug!(target: TARGET, "内存条目已过期: {}", key);
            self.memory.lock().remove(key);
            self.remove_file(&self.file_path(key)).await;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let path = self.file_path(key);
        let result = match read_disk_entry(&path).await {
            DiskRead::Missing => None,
            DiskRead::Corrupt(reason) => {
                warn!(target: TARGET, "缓存文件损坏，已删除: {} ({})", path.display(), reason);
                self.remove_file(&path).await;
                None
            }
            DiskRead::Ok(entry) if entry.is_expired_at(now) => {
                debug!(target: TARGET, "磁盘条目已过期: {}", key);
                self.remove_file(&path).await;
                None
            }
            DiskRead::Ok(entry) => {
                let data = entry.data.clone();
                self.insert_memory(key.to_string(), entry);
                Some(data)
            }
        };

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// 写入缓存，`persist` 时同时落盘
    pub async fn set(
        &self,
        key: &str,
        data: Vec<u8>,
        ttl: Duration,
        persist: bool,
        meta: CacheMeta,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let entry = CacheEntry {
            data: Arc::new(data),
            expire_time: now + ttl.as_secs() as i64,
            create_time: now,
            meta,
        };

        if persist {
            let content = serde_json::to_vec(&DiskEntry::from_entry(key, &entry))?;
            write_atomic(self.file_path(key), content).await?;
        }

        self.insert_memory(key.to_string(), entry);
        Ok(())
    }

    fn insert_memory(&self, key: String, entry: CacheEntry) {
        let mut memory = self.memory.lock();
        if !memory.contains_key(&key) && memory.len() >= self.cleanup_threshold {
            let now = Utc::now().timestamp();
            let before = memory.len();
            memory.retain(|_, e| !e.is_expired_at(now));
            if before != memory.len() {
                debug!(target: TARGET, "清理过期条目 {} 个", before - memory.len());
            }

            // 仍然满载时按创建时间淘汰最旧的一条
            while memory.len() >= self.max_entries {
                let oldest = memory
                    .iter()
                    .min_by_key(|(_, e)| e.create_time)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        memory.remove(&k);
                        debug!(target: TARGET, "淘汰最旧条目: {}", k);
                    }
                    None => break,
                }
            }
        }
        memory.insert(key, entry);
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        let in_memory = self.memory.lock().remove(key).is_some();
        let path = self.file_path(key);
        let on_disk = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if on_disk {
            self.remove_file(&path).await;
        }
        in_memory || on_disk
    }

    /// 删除某个群的全部缓存，返回删除的条目数
    pub async fn invalidate_group(&self, group_id: i64) -> usize {
        let mut removed_keys: Vec<String> = {
            let mut memory = self.memory.lock();
            let keys: Vec<String> = memory
                .iter()
                .filter(|(_, e)| e.meta.group_id == Some(group_id))
                .map(|(k, _)| k.clone())
                .collect();
            for k in &keys {
                memory.remove(k);
            }
            keys
        };

        for path in self.list_files().await {
            if let DiskRead::Ok(entry) = read_disk_entry(&path).await
                && entry.meta.group_id == Some(group_id)
            {
                self.remove_file(&path).await;
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                    && !removed_keys.iter().any(|k| k == stem)
                {
                    removed_keys.push(stem.to_string());
                }
            }
        }

        info!(target: TARGET, "群 {} 的缓存已失效: {} 条", group_id, removed_keys.len());
        removed_keys.len()
    }

    /// 启动时清扫磁盘上过期或损坏的文件
    pub async fn purge_disk(&self) -> usize {
        let now = Utc::now().timestamp();
        let mut removed = 0;
        for path in self.list_files().await {
            let stale = match read_disk_entry(&path).await {
                DiskRead::Ok(entry) => entry.is_expired_at(now),
                DiskRead::Corrupt(_) => true,
                DiskRead::Missing => false,
            };
            if stale {
                self.remove_file(&path).await;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(target: TARGET, "已清理磁盘缓存 {} 个", removed);
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.memory.lock().len(),
            disk_entries: self.list_files().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn list_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
            return files;
        };
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some(CACHE_EXT) {
                files.push(path);
            }
        }
        files
    }

    async fn remove_file(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(target: TARGET, "删除缓存文件失败: {} - {}", path.display(), e);
        }
    }
}

enum DiskRead {
    Missing,
    Corrupt(String),
    Ok(CacheEntry),
}

async fn read_disk_entry(path: &Path) -> DiskRead {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return DiskRead::Missing,
        Err(e) => return DiskRead::Corrupt(e.to_string()),
    };
    match serde_json::from_slice::<DiskEntry>(&bytes) {
        Ok(disk) => match disk.into_entry() {
            Some(entry) => DiskRead::Ok(entry),
            None => DiskRead::Corrupt("base64".to_string()),
        },
        Err(e) => DiskRead::Corrupt(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word_cloud::time::{fixed_offset, resolve_date_range, resolve_period};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        fixed_offset(8).with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
    }

    fn range(start: &str, stop: &str) -> TimeRange {
        resolve_date_range(start, stop, fixed_offset(8)).unwrap()
    }

    #[test]
    fn infers_year_from_jan_first_or_long_span() {
        assert_eq!(infer_period_type(&range("2024-01-01", "2024-01-10")), PeriodType::Year);
        assert_eq!(infer_period_type(&range("2023-03-05", "2024-01-10")), PeriodType::Year);
        assert_eq!(infer_period_type(&range("2024-04-01", "2024-06-30")), PeriodType::Quarter);
        assert_eq!(infer_period_type(&range("2024-05-01", "2024-05-31")), PeriodType::Month);
        // 2024-05-13 是周一
        assert_eq!(infer_period_type(&range("2024-05-13", "2024-05-19")), PeriodType::Week);
        assert_eq!(infer_period_type(&range("2024-05-15", "2024-05-28")), PeriodType::Week);
        assert_eq!(infer_period_type(&range("2024-05-15", "2024-05-15")), PeriodType::Day);
    }

    #[test]
    fn this_month_on_different_days_shares_key() {
        let a_now = at(2024, 5, 3, 10);
        let b_now = at(2024, 5, 27, 22);
        let a = WordCloudTaskParams::for_period(
            1,
            None,
            "group:1",
            Period::ThisMonth,
            resolve_period(Period::ThisMonth, a_now),
            a_now,
        );
        let b = WordCloudTaskParams::for_period(
            1,
            None,
            "group:1",
            Period::ThisMonth,
            resolve_period(Period::ThisMonth, b_now),
            b_now,
        );
        assert_eq!(a.period_id(), "2024-05");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key().len(), 32);

        let mine = WordCloudTaskParams { user_id: Some(42), ..a.clone() };
        assert_ne!(mine.cache_key(), a.cache_key());
    }

    #[test]
    fn period_ids_follow_bucket_format() {
        let now = at(2024, 8, 21, 12);
        let week = WordCloudTaskParams::for_period(
            1,
            None,
            "t",
            Period::ThisWeek,
            resolve_period(Period::ThisWeek, now),
            now,
        );
        assert_eq!(week.period_id(), "2024-W34");

        let quarter = WordCloudTaskParams::for_period(
            1,
            None,
            "t",
            Period::ThisQuarter,
            resolve_period(Period::ThisQuarter, now),
            now,
        );
        assert_eq!(quarter.period_id(), "2024-Q3");

        let custom =
            WordCloudTaskParams::for_range(1, None, "t", range("2024-01-01", "2024-01-31"), now);
        assert_eq!(custom.period_id(), "20240101_20240201");
    }

    #[test]
    fn today_flag_and_ttl() {
        let now = at(2024, 5, 15, 13);
        let ttl = CacheTtl::from_config(&WordCloudConfig::default());

        let today = WordCloudTaskParams::for_period(
            1,
            None,
            "t",
            Period::Today,
            resolve_period(Period::Today, now),
            now,
        );
        assert!(today.is_today);
        assert_eq!(today.ttl(&ttl), ttl.day);

        let last_month = WordCloudTaskParams::for_period(
            1,
            None,
            "t",
            Period::LastMonth,
            resolve_period(Period::LastMonth, now),
            now,
        );
        assert!(!last_month.is_today);
        assert_eq!(last_month.ttl(&ttl), ttl.month);

        let yesterday = WordCloudTaskParams::for_period(
            1,
            None,
            "t",
            Period::Yesterday,
            resolve_period(Period::Yesterday, now),
            now,
        );
        assert!(!yesterday.is_today);
    }

    #[tokio::test]
    async fn persisted_entry_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let meta = CacheMeta {
            group_id: Some(7),
            ..CacheMeta::default()
        };

        let cache = WordCloudCache::new(dir.path(), 10, 8);
        cache
            .set("k1", vec![1, 2, 3], Duration::from_secs(3600), true, meta.clone())
            .await
            .unwrap();
        cache
            .set("k2", vec![9], Duration::from_secs(3600), false, meta)
            .await
            .unwrap();
        assert_eq!(cache.get("k1").await.unwrap().as_slice(), &[1, 2, 3]);

        let reopened = WordCloudCache::new(dir.path(), 10, 8);
        assert_eq!(reopened.get("k1").await.unwrap().as_slice(), &[1, 2, 3]);
        assert!(reopened.get("k2").await.is_none());

        let stats = reopened.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.disk_entries, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_removed_from_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WordCloudCache::new(dir.path(), 10, 8);
        cache
            .set("gone", vec![1], Duration::ZERO, true, CacheMeta::default())
            .await
            .unwrap();
        assert!(dir.path().join("gone.cache").exists());

        assert!(cache.get("gone").await.is_none());
        assert!(!dir.path().join("gone.cache").exists());
        assert_eq!(cache.stats().await.memory_entries, 0);
    }

    #[tokio::test]
    async fn corrupt_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cache");
        std::fs::write(&path, b"not json").unwrap();

        let cache = WordCloudCache::new(dir.path(), 10, 8);
        assert!(cache.get("bad").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn evicts_oldest_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WordCloudCache::new(dir.path(), 3, 3);
        let long = Duration::from_secs(3600);

        cache.set("a", vec![1], long, false, CacheMeta::default()).await.unwrap();
        // 手动拉开创建时间
        cache.memory.lock().get_mut("a").unwrap().create_time -= 100;
        cache.set("b", vec![2], long, false, CacheMeta::default()).await.unwrap();
        cache.set("c", vec![3], long, false, CacheMeta::default()).await.unwrap();
        cache.set("d", vec![4], long, false, CacheMeta::default()).await.unwrap();

        assert_eq!(cache.stats().await.memory_entries, 3);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_purged_before_evicting() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WordCloudCache::new(dir.path(), 3, 2);
        let long = Duration::from_secs(3600);

        cache.set("old", vec![1], long, false, CacheMeta::default()).await.unwrap();
        cache.memory.lock().get_mut("old").unwrap().create_time -= 100;
        cache.set("stale", vec![2], Duration::ZERO, false, CacheMeta::default()).await.unwrap();
        cache.set("new", vec![3], long, false, CacheMeta::default()).await.unwrap();

        // 过期条目被清理后容量足够，最旧的有效条目得以保留
        assert!(cache.get("old").await.is_some());
        assert!(cache.get("new").await.is_some());
        assert_eq!(cache.stats().await.memory_entries, 2);
    }

    #[tokio::test]
    async fn invalidate_group_and_purge_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WordCloudCache::new(dir.path(), 10, 8);
        let long = Duration::from_secs(3600);
        let group = |g| CacheMeta {
            group_id: Some(g),
            ..CacheMeta::default()
        };

        cache.set("g1a", vec![1], long, true, group(1)).await.unwrap();
        cache.set("g1b", vec![1], long, false, group(1)).await.unwrap();
        cache.set("g2", vec![2], long, true, group(2)).await.unwrap();
        cache.set("old", vec![3], Duration::ZERO, true, group(2)).await.unwrap();
        std::fs::write(dir.path().join("junk.cache"), b"{").unwrap();

        assert_eq!(cache.invalidate_group(1).await, 2);
        assert!(cache.get("g1a").await.is_none());
        assert!(cache.get("g2").await.is_some());

        assert_eq!(cache.purge_disk().await, 2);
        assert_eq!(cache.stats().await.disk_entries, 1);

        assert!(cache.invalidate("g2").await);
        assert!(!cache.invalidate("g2").await);
    }
}
