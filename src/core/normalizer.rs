//! 内容规范化 - 比较前屏蔽指令块的生成内容
//!
//! 指令块形如 `<!-- #query page -->...<!-- /query -->`，块内是在各端独立重新生成的
//! 输出（例如查询结果），逐字节不同并不代表真实的编辑冲突。规范化结果只用于比较和
//! 计算 hash，从不写回存储。

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// 指令开始标记，捕获指令名
fn directive_start_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--\s*#([\w\-]+)\s+(.+?)-->").expect("valid regex"))
}

/// 指令结束标记，捕获指令名
fn directive_end_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--\s*/([\w\-]+)\s*-->").expect("valid regex"))
}

/// 找出所有指令块正文的字节范围（不含开始/结束标记）
///
/// 没有结束标记的块一直延伸到文档末尾。
fn directive_bodies(text: &str) -> Vec<Range<usize>> {
    let mut bodies = Vec::new();
    let mut pos = 0;

    while let Some(start) = directive_start_regex().captures(&text[pos..]) {
        let (Some(marker), Some(name)) = (start.get(0), start.get(1)) else {
            break;
        };
        let body_start = pos + marker.end();

        let end = directive_end_regex()
            .captures_iter(&text[body_start..])
            .filter(|c| c.get(1).is_some_and(|n| n.as_str() == name.as_str()))
            .find_map(|c| c.get(0));

        match end {
            Some(end) => {
                bodies.push(body_start..body_start + end.start());
                pos = body_start + end.end();
            }
            None => {
                bodies.push(body_start..text.len());
                break;
            }
        }
    }

    bodies
}

/// 将指令块正文替换为等长空白（保留换行），块外所有字符位置不变
pub fn remove_directive_body(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for body in directive_bodies(text) {
        out.push_str(&text[last..body.start]);
        out.extend(
            text[body.clone()]
                .chars()
                .map(|c| if c == '\n' { '\n' } else { ' ' }),
        );
        last = body.end;
    }
    out.push_str(&text[last..]);
    out
}

/// 去掉指令块正文，仅保留紧跟开始标记的换行，用于计算比较 hash
///
/// 与 `remove_directive_body` 不同，正文长度不同的两个版本也会得到相同结果。
pub fn strip_directive_bodies(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for body in directive_bodies(text) {
        out.push_str(&text[last..body.start]);
        if text[body.clone()].starts_with('\n') {
            out.push('\n');
        }
        last = body.end;
    }
    out.push_str(&text[last..]);
    out
}

/// 计算内容的 hash（使用 BLAKE3 快速哈希）
pub fn calculate_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    // 只取前 16 字节（32 个十六进制字符），足够检测变化
    hash.to_hex()[..32].to_string()
}

/// 内容规范化器
#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    /// 视为文本（可能含指令块）的扩展名，小写，不带点
    text_extensions: Vec<String>,
}

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new(crate::config::default_text_extensions())
    }
}

impl ContentNormalizer {
    pub fn new(text_extensions: Vec<String>) -> Self {
        Self {
            text_extensions: text_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// 根据内容类型或扩展名判断是否为文本
    pub fn is_text(&self, name: &str, content_type: &str) -> bool {
        if content_type.starts_with("text/") {
            return true;
        }
        std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .is_some_and(|ext| self.text_extensions.iter().any(|t| *t == ext))
    }

    /// 规范化后计算 hash；二进制或非 UTF-8 内容按原始字节计算
    pub fn content_hash(&self, name: &str, content_type: &str, data: &[u8]) -> String {
        if self.is_text(name, content_type) {
            if let Ok(text) = std::str::from_utf8(data) {
                return calculate_hash(strip_directive_bodies(text).as_bytes());
            }
        }
        calculate_hash(data)
    }
}
