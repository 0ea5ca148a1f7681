use super::text::top_words;
use crate::config::WordCloudConfig;
use crate::error::{Result, WordCloudError};
use araea_wordcloud::{WordCloudBuilder, WordInput};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

const TARGET: &str = "WordCloud/Render";

/// 亮度修正的平滑过渡带宽度
const BAND: f32 = 0.1;

/// 自动裁边时内容四周保留的像素
const CROP_MARGIN: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    White,
    Black,
}

impl Background {
    /// 只接受白色与黑色，其他值回落到白色
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" | "白" | "白色" => Background::White,
            "black" | "黑" | "黑色" => Background::Black,
            other => {
                warn!(target: TARGET, "不支持的背景色 {:?}，使用白色", other);
                Background::White
            }
        }
    }

    pub fn rgb(&self) -> Rgb<u8> {
        match self {
            Background::White => Rgb([255, 255, 255]),
            Background::Black => Rgb([0, 0, 0]),
        }
    }
}

// 白底用深色系，黑底用亮色系，保证文字可读
const WHITE_PALETTES: &[(&str, &[u32])] = &[
    (
        "default",
        &[0x1F77B4, 0xD62728, 0x2CA02C, 0x9467BD, 0x8C564B, 0xE377C2, 0xFF7F0E, 0x17BECF],
    ),
    ("ocean", &[0x03045E, 0x023E8A, 0x0077B6, 0x0096C7, 0x00B4D8, 0x005F73]),
    ("autumn", &[0x9B2226, 0xAE2012, 0xBB3E03, 0xCA6702, 0xEE9B00, 0x6A040F]),
    ("forest", &[0x081C15, 0x1B4332, 0x2D6A4F, 0x40916C, 0x52B788, 0x386641]),
];

const BLACK_PALETTES: &[(&str, &[u32])] = &[
    (
        "default",
        &[0xFFD166, 0x06D6A0, 0x4CC9F0, 0xF72585, 0xB5E48C, 0xFF9F1C, 0xE0AAFF, 0xFFFFFF],
    ),
    ("neon", &[0x39FF14, 0xFF073A, 0x0FF0FC, 0xFFF01F, 0xBC13FE, 0xFF5E00]),
    ("pastel", &[0xFFADAD, 0xFFD6A5, 0xFDFFB6, 0xCAFFBF, 0x9BF6FF, 0xA0C4FF, 0xBDB2FF]),
    ("ice", &[0xCAF0F8, 0xADE8F4, 0x90E0EF, 0x48CAE4, 0x00B4D8, 0xE0FBFC]),
];

fn hex(c: u32) -> Rgb<u8> {
    Rgb([(c >> 16) as u8, (c >> 8) as u8, c as u8])
}

/// 按背景选择配色，名称未知时用该背景的默认配色
pub fn palette_for(background: Background, name: Option<&str>) -> Vec<Rgb<u8>> {
    let table = match background {
        Background::White => WHITE_PALETTES,
        Background::Black => BLACK_PALETTES,
    };
    let wanted = name.map(|n| n.trim().to_ascii_lowercase());
    let found = wanted
        .as_deref()
        .and_then(|n| table.iter().find(|(k, _)| *k == n));

    if found.is_none()
        && let Some(n) = &wanted
    {
        warn!(target: TARGET, "配色 {:?} 不适用于当前背景，使用默认配色", n);
    }

    found
        .unwrap_or(&table[0])
        .1
        .iter()
        .map(|c| hex(*c))
        .collect()
}

/// ITU-R BT.709 亮度，范围 0.0 - 1.0
pub fn luminance(c: Rgb<u8>) -> f32 {
    (0.2126 * c[0] as f32 + 0.7152 * c[1] as f32 + 0.0722 * c[2] as f32) / 255.0
}

fn ease_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t) * (1.0 - t)
}

/// 前景亮度修正：白底压到 `max` 以下，黑底抬到 `min` 以上，阈值附近平滑过渡
pub fn adjust_brightness(c: Rgb<u8>, background: Background, min: f32, max: f32) -> Rgb<u8> {
    let lum = luminance(c);
    let target = match background {
        Background::White => {
            let knee = (max - BAND).max(0.0);
            if lum <= knee {
                return c;
            }
            let t = (lum - knee) / (1.0 - knee).max(f32::EPSILON);
            knee + (max - knee) * ease_out(t)
        }
        Background::Black => {
            let knee = (min + BAND).min(1.0);
            if lum >= knee {
                return c;
            }
            let t = (knee - lum) / knee.max(f32::EPSILON);
            knee - (knee - min) * ease_out(t)
        }
    };

    if lum <= f32::EPSILON {
        let v = (target * 255.0).round().clamp(0.0, 255.0) as u8;
        return Rgb([v, v, v]);
    }

    let k = target / lum;
    Rgb(c.0.map(|ch| (ch as f32 * k).round().clamp(0.0, 255.0) as u8))
}

fn to_hex(c: Rgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

/// 渲染参数
#[derive(Clone)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub limit: usize,
    pub font: Option<Arc<Vec<u8>>>,
    pub background: Background,
    /// 已按背景做过亮度修正的配色
    pub palette: Vec<Rgb<u8>>,
    /// 遮罩原始字节（PNG/JPG/SVG），白色或透明区域不排字
    pub mask: Option<Arc<Vec<u8>>>,
    pub auto_crop: bool,
    pub seed: Option<u64>,
}

impl RenderOptions {
    /// 从配置构造，字体与遮罩在此读取一次
    pub fn from_config(cfg: &WordCloudConfig) -> Result<Self> {
        let background = Background::parse(&cfg.background_color);

        let font = match &cfg.font_path {
            Some(path) => Some(Arc::new(std::fs::read(path).map_err(|e| {
                WordCloudError::Render(format!("加载字体文件失败: {} - {}", path, e))
            })?)),
            None => None,
        };

        let mask = match &cfg.mask_path {
            Some(path) => {
                let data = std::fs::read(path).map_err(|e| {
                    WordCloudError::Render(format!("加载遮罩图片失败: {} - {}", path, e))
                })?;
                if data.is_empty() {
                    return Err(WordCloudError::Render(format!("遮罩图片为空: {}", path)));
                }
                Some(Arc::new(data))
            }
            None => None,
        };

        let min = cfg.min_brightness.clamp(0.0, 1.0);
        let max = cfg.max_brightness.clamp(0.0, 1.0);
        let palette = palette_for(background, cfg.colormap.as_deref())
            .into_iter()
            .map(|c| adjust_brightness(c, background, min, max))
            .collect();

        Ok(Self {
            width: cfg.width.max(100),
            height: cfg.height.max(100),
            scale: cfg.scale.clamp(1.0, 4.0),
            limit: cfg.limit.max(1),
            font,
            background,
            palette,
            mask,
            auto_crop: cfg.auto_crop,
            seed: None,
        })
    }
}

/// 词频 → PNG
pub struct WordCloudGenerator {
    options: RenderOptions,
}

impl WordCloudGenerator {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// 在阻塞线程池中渲染
    pub async fn generate_async(
        self: &Arc<Self>,
        freq: HashMap<String, u32>,
    ) -> Result<Vec<u8>> {
        let generator = self.clone();
        tokio::task::spawn_blocking(move || generator.generate(&freq))
            .await
            .map_err(|e| WordCloudError::Render(format!("Task Join Error: {}", e)))?
    }

    pub fn generate(&self, freq: &HashMap<String, u32>) -> Result<Vec<u8>> {
        let start = Instant::now();
        let opts = &self.options;

        let top = top_words(freq, opts.limit);
        if top.is_empty() {
            return Err(WordCloudError::NoWords);
        }

        let words: Vec<WordInput> = top
            .into_iter()
            .map(|(text, count)| WordInput::new(text, count as f32))
            .collect();

        let mut rng = StdRng::seed_from_u64(opts.seed.unwrap_or_else(|| rand::rng().random()));
        let mut builder = WordCloudBuilder::new()
            .size(opts.width, opts.height)
            .seed(rng.random())
            .background(to_hex(opts.background.rgb()))
            .colors(opts.palette.iter().map(|c| to_hex(*c)));

        if let Some(font) = &opts.font {
            builder = builder.font(font.as_ref().clone());
        }

        // 有遮罩时保持画布形状，不裁边
        match &opts.mask {
            Some(mask) => builder = builder.mask(mask.as_ref().clone()),
            None if opts.auto_crop => builder = builder.trim(true).trim_margin(CROP_MARGIN),
            None => {}
        }

        let wordcloud = builder
            .build(&words)
            .map_err(|e| WordCloudError::Render(format!("Build Error: {}", e)))?;

        // 按倍率超采样渲染，再缩回布局尺寸
        let png_data = wordcloud
            .to_png(opts.scale)
            .map_err(|e| WordCloudError::Render(format!("PNG Encode Error: {}", e)))?;

        let view = wordcloud.viewport;
        let rendered = image::load_from_memory(&png_data)
            .map_err(|e| WordCloudError::Render(format!("Image Load Error: {}", e)))?
            .to_rgb8();
        let canvas = if rendered.dimensions() != (view.width, view.height) {
            image::imageops::resize(&rendered, view.width, view.height, FilterType::Lanczos3)
        } else {
            rendered
        };

        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| WordCloudError::Render(format!("Image Write Error: {}", e)))?;

        info!(
            target: TARGET,
            "Generated {}x{} in {:?}",
            view.width,
            view.height,
            start.elapsed()
        );
        Ok(buffer.into_inner())
    }
}
