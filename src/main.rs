use chrono::Local;
use ciyun::db;
use ciyun::prelude::*;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};

/// 控制台模拟的群与用户
const CONSOLE_GROUP: i64 = 10000;
const CONSOLE_USER: i64 = 10001;

/// 文本打印到终端，图片写入输出目录
struct ConsoleSink {
    output_dir: PathBuf,
    seq: AtomicU64,
}

impl ConsoleSink {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            seq: AtomicU64::new(0),
        }
    }

    async fn say(&self, text: impl Into<String>) {
        let target = format!("group:{}", CONSOLE_GROUP);
        if let Err(e) = self.send(&target, Message::from(text.into())).await {
            error!(target: "Console", "输出失败: {}", e);
        }
    }
}

#[async_trait]
impl MessageSink for ConsoleSink {
    async fn send(&self, target: &str, message: Message) -> anyhow::Result<()> {
        let text = message.plain_text();
        if !text.is_empty() {
            println!("[{}] {}", target, text);
        }

        for png in message.images() {
            tokio::fs::create_dir_all(&self.output_dir).await?;
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let path = self.output_dir.join(format!(
                "word_cloud_{}_{}.png",
                Local::now().format("%Y%m%d_%H%M%S"),
                seq
            ));
            tokio::fs::write(&path, &png).await?;
            println!("[{}] 图片已保存: {}", target, path.display());
        }
        Ok(())
    }
}

async fn dispatch(
    command: Command,
    msg_id: String,
    service: &WordCloudService,
    sink: &ConsoleSink,
) {
    match command {
        Command::Cloud { scope, time } => {
            let request = WordCloudRequest {
                scope,
                time,
                group_id: CONSOLE_GROUP,
                user_id: CONSOLE_USER,
                reply_to: Some(msg_id),
            };
            let outcome = service.handle(request).await;
            info!(target: "Console", "词云请求结果: {:?}", outcome);
        }
        Command::SetSchedule(time) => {
            match service
                .schedules()
                .set_schedule(CONSOLE_GROUP, time.as_deref())
                .await
            {
                Ok(t) => sink.say(format!("已设置每天 {} 推送本群今日词云", t)).await,
                Err(e) => sink.say(e.user_message()).await,
            }
        }
        Command::RemoveSchedule => match service.schedules().remove_schedule(CONSOLE_GROUP).await {
            Ok(true) => sink.say("已取消本群的定时词云").await,
            Ok(false) => sink.say("本群没有设置定时词云").await,
            Err(e) => sink.say(e.user_message()).await,
        },
        Command::ShowSchedule => match service.schedules().get_schedule_time(CONSOLE_GROUP).await {
            Some(t) => sink.say(format!("本群定时词云时间: 每天 {}", t)).await,
            None => sink.say("本群没有设置定时词云").await,
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let manager = ConfigManager::new("config.toml");
    let config = manager.load().await?;
    ciyun::log::init(&config.core.log_level);

    if !config.word_cloud.enabled {
        info!(target: "Console", "词云功能未启用");
        return Ok(());
    }

    let conn = db::init(&config.core.database_url, &config.core.data_dir).await?;
    let source = Arc::new(DbMessageSource::new(conn));
    source.init_table().await?;

    let sink = Arc::new(ConsoleSink::new(
        PathBuf::from(&config.core.data_dir).join("output"),
    ));
    let service = WordCloudService::init(&config, source.clone(), sink.clone()).await?;

    info!(target: "Console", "输入聊天内容记录到群 {}，输入 /exit 退出", CONSOLE_GROUP);

    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    let mut counter = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line_result = reader.next_line() => {
                match line_result {
                    Ok(Some(text)) => {
                        let content = text.trim().to_string();
                        if content.is_empty() { continue; }
                        if content == "/exit" { break; }

                        counter += 1;
                        let msg_id = format!("msg_{}", counter);

                        match parse_command(&content, &config.core.cmd_prefix) {
                            Some(command) => dispatch(command, msg_id, &service, &sink).await,
                            None => {
                                let now = Local::now().timestamp();
                                if let Err(e) = source.record(CONSOLE_GROUP, CONSOLE_USER, &content, now).await {
                                    error!(target: "Console", "记录消息失败: {}", e);
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(target: "Console", "读取输入错误: {}", e);
                        break;
                    }
                }
            }
        }
    }

    service.shutdown().await;
    Ok(())
}
