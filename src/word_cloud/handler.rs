use super::cache::{CacheTtl, WordCloudCache, WordCloudTaskParams};
use super::data::{DataService, MessageQuery};
use super::image::WordCloudGenerator;
use super::text::TextProcessor;
use super::time::{Period, now_in, resolve_date_range, resolve_period};
use crate::error::{Result, WordCloudError};
use crate::message::Message;
use crate::task::{TaskManager, TaskPriority};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use log::{debug, info, warn};
use std::sync::Arc;

const TARGET: &str = "WordCloud/Handler";

/// 消息出口
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn send(&self, target: &str, message: Message) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Group,
    Mine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSpec {
    Period(Period),
    Range { start: String, stop: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordCloudRequest {
    pub scope: Scope,
    pub time: TimeSpec,
    pub group_id: i64,
    pub user_id: i64,
    /// 触发指令的消息 ID，定时推送时为 None
    pub reply_to: Option<String>,
}

impl WordCloudRequest {
    pub fn title(&self) -> String {
        let who = match self.scope {
            Scope::Group => "本群",
            Scope::Mine => "我的",
        };
        match &self.time {
            TimeSpec::Period(p) => format!("{}{}词云", who, p.label()),
            TimeSpec::Range { start, stop } => format!("{} {}~{} 词云", who, start, stop),
        }
    }

    pub fn target(&self) -> String {
        format!("group:{}", self.group_id)
    }
}

/// 处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    CacheHit,
    Generated,
    Queued,
    /// 同一分桶已在生成中
    InProgress,
    Failed,
}

pub struct CloudHandler {
    data: DataService,
    text: TextProcessor,
    generator: Arc<WordCloudGenerator>,
    cache: Arc<WordCloudCache>,
    tasks: Option<TaskManager>,
    ttl: CacheTtl,
    tz: FixedOffset,
}

impl CloudHandler {
    pub fn new(
        data: DataService,
        text: TextProcessor,
        generator: Arc<WordCloudGenerator>,
        cache: Arc<WordCloudCache>,
        tasks: Option<TaskManager>,
        ttl: CacheTtl,
        tz: FixedOffset,
    ) -> Self {
        Self {
            data,
            text,
            generator,
            cache,
            tasks,
            ttl,
            tz,
        }
    }

    pub fn cache(&self) -> &Arc<WordCloudCache> {
        &self.cache
    }

    pub fn text(&self) -> &TextProcessor {
        &self.text
    }

    pub fn tasks(&self) -> Option<&TaskManager> {
        self.tasks.as_ref()
    }

    pub fn timezone(&self) -> FixedOffset {
        self.tz
    }

    /// 解析请求为生成参数
    pub fn resolve(
        &self,
        request: &WordCloudRequest,
        now: DateTime<FixedOffset>,
    ) -> Result<WordCloudTaskParams> {
        let user_id = match request.scope {
            Scope::Group => None,
            Scope::Mine => Some(request.user_id),
        };
        let params = match &request.time {
            TimeSpec::Period(period) => WordCloudTaskParams::for_period(
                request.group_id,
                user_id,
                request.target(),
                *period,
                resolve_period(*period, now),
                now,
            ),
            TimeSpec::Range { start, stop } => WordCloudTaskParams::for_range(
                request.group_id,
                user_id,
                request.target(),
                resolve_date_range(start, stop, self.tz)?,
                now,
            ),
        };
        Ok(params)
    }

    pub async fn handle(
        self: &Arc<Self>,
        request: WordCloudRequest,
        sink: Arc<dyn MessageSink>,
    ) -> HandleOutcome {
        self.handle_at(request, sink, now_in(self.tz), TaskPriority::Normal)
            .await
    }

    /// 查缓存，未命中则入队或直接生成，结果与错误都发回请求方
    pub async fn handle_at(
        self: &Arc<Self>,
        request: WordCloudRequest,
        sink: Arc<dyn MessageSink>,
        now: DateTime<FixedOffset>,
        priority: TaskPriority,
    ) -> HandleOutcome {
        let title = request.title();
        let target = request.target();

        let params = match self.resolve(&request, now) {
            Ok(p) => p,
            Err(e) => {
                self.reply_error(&sink, &request, &e).await;
                return HandleOutcome::Failed;
            }
        };

        let key = params.cache_key();
        if let Some(png) = self.cache.get(&key).await {
            debug!(target: TARGET, "缓存命中: {} ({})", title, key);
            return match deliver(&sink, &target, request.reply_to.as_deref(), &title, &png).await {
                Ok(()) => HandleOutcome::CacheHit,
                Err(e) => {
                    warn!(target: TARGET, "{}", e);
                    HandleOutcome::Failed
                }
            };
        }

        let Some(tasks) = &self.tasks else {
            return match self.run(params, &request, &sink).await {
                Ok(()) => HandleOutcome::Generated,
                Err(_) => HandleOutcome::Failed,
            };
        };

        // 以缓存键作为任务 ID，同一分桶不会并发生成两次
        let handler = self.clone();
        let task_sink = sink.clone();
        let task_request = request.clone();
        let accepted = tasks.add_task(
            key.clone(),
            async move {
                handler
                    .run(params, &task_request, &task_sink)
                    .await
                    .map_err(anyhow::Error::from)
            },
            priority,
            None,
        );

        if accepted {
            info!(target: TARGET, "{} 已加入队列 ({})", title, key);
            return HandleOutcome::Queued;
        }

        let in_progress = tasks
            .get_task_status(&key)
            .is_some_and(|info| !info.status.is_finished());
        if in_progress {
            if request.reply_to.is_some() {
                let msg = reply_text(&request, format!("{} 正在生成中，请稍候。", title));
                send_or_warn(&sink, &target, msg).await;
            }
            HandleOutcome::InProgress
        } else {
            self.reply_error(&sink, &request, &WordCloudError::QueueFull).await;
            HandleOutcome::Failed
        }
    }

    async fn run(
        &self,
        params: WordCloudTaskParams,
        request: &WordCloudRequest,
        sink: &Arc<dyn MessageSink>,
    ) -> Result<()> {
        let title = request.title();
        let key = params.cache_key();

        let png = match self.generate_for(&params).await {
            Ok(png) => png,
            Err(e) => {
                self.reply_error(sink, request, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .cache
            .set(&key, png.clone(), params.ttl(&self.ttl), !params.is_today, params.meta())
            .await
        {
            warn!(target: TARGET, "写入缓存失败: {} - {}", key, e);
        }

        deliver(sink, &params.target, request.reply_to.as_deref(), &title, &png).await
    }

    /// 读取聊天记录并渲染为 PNG
    pub async fn generate_for(&self, params: &WordCloudTaskParams) -> Result<Vec<u8>> {
        let data = self
            .data
            .get_messages(&MessageQuery {
                group_id: params.group_id,
                user_id: params.user_id,
                range: params.range,
            })
            .await?;
        if data.is_empty() {
            return Err(WordCloudError::NoData);
        }

        let messages = self.text.preprocess(&data.messages);
        if messages.is_empty() {
            return Err(WordCloudError::NoData);
        }

        let freq = self.text.extract_keywords(messages).await?;
        if freq.is_empty() {
            return Err(WordCloudError::NoWords);
        }

        self.generator.generate_async(freq).await
    }

    async fn reply_error(
        &self,
        sink: &Arc<dyn MessageSink>,
        request: &WordCloudRequest,
        err: &WordCloudError,
    ) {
        // 定时推送没有数据时静默跳过
        if request.reply_to.is_none() && matches!(err, WordCloudError::NoData) {
            debug!(target: TARGET, "群 {} 没有可用的消息，跳过推送", request.group_id);
            return;
        }
        warn!(target: TARGET, "{} 生成失败: {}", request.title(), err);
        send_or_warn(sink, &request.target(), reply_text(request, err.user_message())).await;
    }
}

fn reply_text(request: &WordCloudRequest, text: String) -> Message {
    let mut msg = Message::new();
    if let Some(id) = &request.reply_to {
        msg = msg.reply(id);
    }
    msg.text(text)
}

async fn deliver(
    sink: &Arc<dyn MessageSink>,
    target: &str,
    reply_to: Option<&str>,
    title: &str,
    png: &[u8],
) -> Result<()> {
    let mut msg = Message::new();
    if let Some(id) = reply_to {
        msg = msg.reply(id);
    }
    let msg = msg.text(format!("📊 {}", title)).image_bytes(png);
    send(sink, target, msg).await
}

async fn send(sink: &Arc<dyn MessageSink>, target: &str, msg: Message) -> Result<()> {
    sink.send(target, msg)
        .await
        .map_err(|e| WordCloudError::Send(format!("{} - {:#}", target, e)))
}

async fn send_or_warn(sink: &Arc<dyn MessageSink>, target: &str, msg: Message) {
    if let Err(e) = send(sink, target, msg).await {
        warn!(target: TARGET, "{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WordCloudConfig;
    use crate::pool::PoolConfig;
    use crate::task::TaskManagerConfig;
    use crate::word_cloud::data::MessageSource;
    use crate::word_cloud::image::{Background, RenderOptions, palette_for};
    use crate::word_cloud::stopwords::StopWords;
    use crate::word_cloud::text::{JiebaFactory, SegmenterPool};
    use crate::word_cloud::time::fixed_offset;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubSource {
        messages: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageSource for StubSource {
        async fn fetch(&self, _query: &MessageQuery, _limit: u64) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.messages.clone())
        }

        async fn fetch_chunk(
            &self,
            _query: &MessageQuery,
            offset: u64,
            chunk_size: u64,
        ) -> Result<Vec<String>> {
            Ok(self
                .messages
                .iter()
                .skip(offset as usize)
                .take(chunk_size as usize)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Message)>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, target: &str, message: Message) -> anyhow::Result<()> {
            self.sent.lock().push((target.to_string(), message));
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl MessageSink for BrokenSink {
        async fn send(&self, _target: &str, _message: Message) -> anyhow::Result<()> {
            anyhow::bail!("connection closed")
        }
    }

    struct Fixture {
        handler: Arc<CloudHandler>,
        source: Arc<StubSource>,
        sink: Arc<RecordingSink>,
        _dir: tempfile::TempDir,
    }

    fn fixture(messages: &[&str], tasks: Option<TaskManager>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(StubSource {
            messages: messages.iter().map(|m| m.to_string()).collect(),
            calls: AtomicUsize::new(0),
        });
        let pool = SegmenterPool::new(
            "jieba-test",
            PoolConfig {
                min_size: 0,
                max_size: 1,
                ..PoolConfig::default()
            },
            JiebaFactory::new(
                ["今天", "天气", "真好", "不错"]
                    .iter()
                    .map(|w| w.to_string())
                    .collect(),
            ),
        );
        let generator = WordCloudGenerator::new(RenderOptions {
            width: 240,
            height: 180,
            scale: 1.0,
            limit: 50,
            font: None,
            background: Background::White,
            palette: palette_for(Background::White, None),
            mask: None,
            auto_crop: false,
            seed: Some(1),
        });

        let handler = CloudHandler::new(
            DataService::new(source.clone(), 1000),
            TextProcessor::new(pool, StopWords::builtin(), vec!["/".to_string()]),
            Arc::new(generator),
            Arc::new(WordCloudCache::new(dir.path(), 10, 8)),
            tasks,
            CacheTtl::from_config(&WordCloudConfig::default()),
            fixed_offset(8),
        );

        Fixture {
            handler: Arc::new(handler),
            source,
            sink: Arc::new(RecordingSink::default()),
            _dir: dir,
        }
    }

    fn request(period: Period) -> WordCloudRequest {
        WordCloudRequest {
            scope: Scope::Group,
            time: TimeSpec::Period(period),
            group_id: 1001,
            user_id: 42,
            reply_to: Some("m1".to_string()),
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<FixedOffset> {
        fixed_offset(8).with_ymd_and_hms(y, m, d, 12, 0, 0).single().unwrap()
    }

    #[tokio::test]
    async fn generates_and_sends_image() {
        let f = fixture(&["今天 天气 真好", "今天 天气 不错"], None);
        let sink: Arc<dyn MessageSink> = f.sink.clone();

        let outcome = f.handler.handle(request(Period::Today), sink).await;
        assert_eq!(outcome, HandleOutcome::Generated);

        let sent = f.sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "group:1001");
        assert_eq!(sent[0].1.plain_text(), "📊 本群今日词云");
        let images = sent[0].1.images();
        assert_eq!(images.len(), 1);
        assert!(images[0].starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[tokio::test]
    async fn this_month_hits_cache_on_later_day() {
        let f = fixture(&["今天 天气 真好", "今天 天气 不错"], None);
        let sink: Arc<dyn MessageSink> = f.sink.clone();

        let first = f
            .handler
            .handle_at(request(Period::ThisMonth), sink.clone(), at(2024, 5, 3), TaskPriority::Normal)
            .await;
        let second = f
            .handler
            .handle_at(request(Period::ThisMonth), sink, at(2024, 5, 20), TaskPriority::Normal)
            .await;

        assert_eq!(first, HandleOutcome::Generated);
        assert_eq!(second, HandleOutcome::CacheHit);
        assert_eq!(f.source.calls.load(Ordering::SeqCst), 1);

        let sent = f.sink.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.images(), sent[1].1.images());
    }

    #[tokio::test]
    async fn send_failure_is_reported_but_result_is_cached() {
        let f = fixture(&["今天 天气 真好", "今天 天气 不错"], None);
        let broken: Arc<dyn MessageSink> = Arc::new(BrokenSink);
        let now = at(2024, 5, 3);

        let first = f
            .handler
            .handle_at(request(Period::LastMonth), broken, now, TaskPriority::Normal)
            .await;
        assert_eq!(first, HandleOutcome::Failed);

        let sink: Arc<dyn MessageSink> = f.sink.clone();
        let retry = f
            .handler
            .handle_at(request(Period::LastMonth), sink, now, TaskPriority::Normal)
            .await;
        assert_eq!(retry, HandleOutcome::CacheHit);
        assert_eq!(f.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_history_reports_no_data() {
        let f = fixture(&[], None);
        let sink: Arc<dyn MessageSink> = f.sink.clone();

        let outcome = f.handler.handle(request(Period::Yesterday), sink.clone()).await;
        assert_eq!(outcome, HandleOutcome::Failed);
        {
            let sent = f.sink.sent.lock();
            assert_eq!(sent.len(), 1);
            assert!(sent[0].1.plain_text().contains("没有足够的消息记录"));
        }

        // 定时推送没有数据时不发消息
        let scheduled = WordCloudRequest {
            reply_to: None,
            ..request(Period::Today)
        };
        f.handler.handle(scheduled, sink).await;
        assert_eq!(f.sink.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn invalid_range_is_reported() {
        let f = fixture(&["今天 天气 真好"], None);
        let sink: Arc<dyn MessageSink> = f.sink.clone();
        let req = WordCloudRequest {
            time: TimeSpec::Range {
                start: "2024-02-01".to_string(),
                stop: "2024-01-01".to_string(),
            },
            ..request(Period::Today)
        };

        assert_eq!(f.handler.handle(req, sink).await, HandleOutcome::Failed);
        assert!(f.sink.sent.lock()[0].1.plain_text().starts_with("参数错误"));
        assert_eq!(f.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn queued_generation_is_delivered_once() {
        let tasks = TaskManager::new(TaskManagerConfig {
            max_concurrent: 1,
            max_queue_size: 4,
            default_timeout: Duration::from_secs(30),
            max_completed: 10,
        });
        let f = fixture(&["今天 天气 真好", "今天 天气 不错"], Some(tasks.clone()));
        let sink: Arc<dyn MessageSink> = f.sink.clone();
        let now = at(2024, 5, 3);

        let first = f
            .handler
            .handle_at(request(Period::LastMonth), sink.clone(), now, TaskPriority::Normal)
            .await;
        let second = f
            .handler
            .handle_at(request(Period::LastMonth), sink.clone(), now, TaskPriority::Normal)
            .await;
        assert_eq!(first, HandleOutcome::Queued);
        assert_eq!(second, HandleOutcome::InProgress);

        tasks.start();
        tasks.shutdown(true).await;

        let sent = f.sink.sent.lock();
        let images: Vec<_> = sent.iter().filter(|(_, m)| !m.images().is_empty()).collect();
        assert_eq!(images.len(), 1);
        assert_eq!(f.source.calls.load(Ordering::SeqCst), 1);
    }
}
