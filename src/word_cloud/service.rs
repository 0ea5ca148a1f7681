use super::cache::{CacheTtl, WordCloudCache};
use super::data::{DataService, MessageSource};
use super::handler::{CloudHandler, HandleOutcome, MessageSink, Scope, TimeSpec, WordCloudRequest};
use super::image::{RenderOptions, WordCloudGenerator};
use super::schedule::{ScheduleCallback, ScheduleManager};
use super::stopwords::StopWords;
use super::text::{JiebaFactory, SegmenterPool, TextProcessor};
use super::time::{Period, fixed_offset, now_in};
use crate::config::{AppConfig, WordCloudConfig};
use crate::error::Result;
use crate::pool::PoolConfig;
use crate::scheduler::Scheduler;
use crate::task::{TaskManager, TaskManagerConfig, TaskPriority};
use futures_util::FutureExt;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

const TARGET: &str = "WordCloud";

fn pool_config(cfg: &WordCloudConfig) -> PoolConfig {
    PoolConfig {
        min_size: cfg.pool_min_size,
        max_size: cfg.pool_max_size,
        max_idle: Duration::from_secs(cfg.pool_max_idle_secs),
        max_use_count: cfg.pool_max_use_count,
        resource_timeout: Duration::from_secs(cfg.pool_resource_timeout_secs),
        cleanup_interval: Duration::from_secs(cfg.pool_cleanup_interval_secs),
        max_errors: cfg.pool_max_errors,
    }
}

/// 词云服务的全部组件，显式构造与关闭
pub struct WordCloudService {
    handler: Arc<CloudHandler>,
    pool: SegmenterPool,
    tasks: Option<TaskManager>,
    scheduler: Arc<Scheduler>,
    schedules: ScheduleManager,
    sink: Arc<dyn MessageSink>,
}

impl WordCloudService {
    pub async fn init(
        config: &AppConfig,
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        let cfg = &config.word_cloud;
        let tz = fixed_offset(config.core.timezone_offset_hours);

        let pool = SegmenterPool::new(
            "jieba",
            pool_config(cfg),
            JiebaFactory::new(cfg.user_words.clone()),
        );
        pool.initialize().await?;
        pool.start_cleanup();

        let text = TextProcessor::new(
            pool.clone(),
            StopWords::load(cfg.stopwords_path.as_deref()),
            config.core.cmd_prefix.clone(),
        );
        let generator = Arc::new(WordCloudGenerator::new(RenderOptions::from_config(cfg)?));

        let cache = Arc::new(WordCloudCache::from_config(cfg));
        cache.purge_disk().await;

        let tasks = cfg.use_task_queue.then(|| {
            let tm = TaskManager::new(TaskManagerConfig::from_config(cfg));
            tm.start();
            tm
        });

        let handler = Arc::new(CloudHandler::new(
            DataService::new(source, cfg.max_msg),
            text,
            generator,
            cache,
            tasks.clone(),
            CacheTtl::from_config(cfg),
            tz,
        ));

        let scheduler = Arc::new(Scheduler::new(tz));
        let schedules = ScheduleManager::new(
            &cfg.schedule_file,
            &cfg.default_schedule_time,
            Duration::from_secs(cfg.schedule_jitter_secs),
            scheduler.clone(),
            daily_push(&handler, &sink),
        );
        if let Err(e) = schedules.load().await {
            warn!(target: TARGET, "读取定时配置失败: {}", e);
        }

        info!(
            target: TARGET,
            "词云服务已启动 (分词池 {}, 任务队列 {})",
            pool.size(),
            if tasks.is_some() { "开启" } else { "关闭" }
        );

        Ok(Self {
            handler,
            pool,
            tasks,
            scheduler,
            schedules,
            sink,
        })
    }

    pub fn handler(&self) -> &Arc<CloudHandler> {
        &self.handler
    }

    pub fn schedules(&self) -> &ScheduleManager {
        &self.schedules
    }

    pub async fn handle(&self, request: WordCloudRequest) -> HandleOutcome {
        self.handler.handle(request, self.sink.clone()).await
    }

    /// 按与启动相反的顺序关闭：定时任务 → 任务队列 → 分词池
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        if let Some(tasks) = &self.tasks {
            tasks.shutdown(true).await;
        }
        self.pool.shutdown().await;
        info!(target: TARGET, "词云服务已关闭");
    }
}

/// 定时推送当天的群词云
fn daily_push(handler: &Arc<CloudHandler>, sink: &Arc<dyn MessageSink>) -> ScheduleCallback {
    let handler = Arc::downgrade(handler);
    let sink = sink.clone();
    Arc::new(move |group_id: i64| {
        let handler = handler.clone();
        let sink = sink.clone();
        async move {
            let Some(handler) = handler.upgrade() else {
                return;
            };
            let request = WordCloudRequest {
                scope: Scope::Group,
                time: TimeSpec::Period(Period::Today),
                group_id,
                user_id: 0,
                reply_to: None,
            };
            let now = now_in(handler.timezone());
            let outcome = handler.handle_at(request, sink, now, TaskPriority::Low).await;
            info!(target: TARGET, "群 {} 定时词云: {:?}", group_id, outcome);
        }
        .boxed()
    })
}
