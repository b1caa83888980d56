//! Outline Parser - 模型自由文本中的大纲提取与校验
//!
//! 整个系统里最容易出 bug 的边界：模型输出是不可信输入。
//! 解析分三步：定位 JSON → 反序列化 → 结构校验。
//! 页数分配之和偏离目标超出容差时做确定性的按比例重整，
//! 结构性违规（空章节、非法分配）是类型化的解析错误。
//!
//! 解析失败属于契约违规而不是网络问题，调用方不得按瞬态错误重试。

use serde::Deserialize;
use thiserror::Error;

use crate::domain::book::{
    Architecture, BookParams, ChapterOutline, JobId, RecurringElement, SpecialSection,
};

/// 大纲解析错误（该阶段的致命错误）
#[derive(Debug, Error)]
pub enum OutlineParseError {
    #[error("no JSON object found in model output")]
    NoJsonObject,

    #[error("malformed outline JSON: {0}")]
    MalformedJson(String),

    #[error("outline has no chapters")]
    EmptyChapters,

    #[error("chapter {index} has invalid page allocation: {pages}")]
    InvalidAllocation { index: usize, pages: i64 },

    #[error("page allocations sum to zero")]
    ZeroAllocation,
}

#[derive(Debug, Deserialize)]
struct RawOutline {
    chapters: Vec<RawChapter>,
    #[serde(default)]
    recurring_elements: Vec<RawRecurring>,
    #[serde(default)]
    special_sections: Vec<RawSpecial>,
}

#[derive(Debug, Deserialize)]
struct RawChapter {
    title: String,
    target_pages: i64,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    recurring_refs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecurring {
    name: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawSpecial {
    title: String,
    #[serde(default)]
    placement: String,
    #[serde(default)]
    description: String,
}

/// 从自由文本中定位 JSON 对象
///
/// 优先取 ```json 围栏内容，否则做花括号配对提取最外层对象。
fn extract_json(text: &str) -> Option<&str> {
    if let Some(fence_start) = text.find("```json") {
        let body = &text[fence_start + 7..];
        if let Some(fence_end) = body.find("```") {
            return Some(body[..fence_end].trim());
        }
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 按比例把页数分配重整到目标值（最大余数法，确定性）
fn renormalize(allocations: &mut [u32], target: u32) {
    let sum: u64 = allocations.iter().map(|p| *p as u64).sum();
    if sum == 0 || sum == target as u64 {
        return;
    }

    let mut scaled: Vec<(usize, u32, f64)> = allocations
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let exact = *p as f64 * target as f64 / sum as f64;
            let floor = (exact.floor() as u32).max(1);
            (i, floor, exact - floor as f64)
        })
        .collect();

    let mut assigned: u32 = scaled.iter().map(|(_, f, _)| *f).sum();

    // 余数大者优先补页；索引升序兜底保证确定性
    scaled.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let mut cursor = 0usize;
    while assigned < target {
        let slot = cursor % scaled.len();
        scaled[slot].1 += 1;
        assigned += 1;
        cursor += 1;
    }
    while assigned > target {
        // 从余数最小端扣减，保持每章至少 1 页
        if let Some(entry) = scaled
            .iter_mut()
            .rev()
            .find(|(_, floor, _)| *floor > 1)
        {
            entry.1 -= 1;
            assigned -= 1;
        } else {
            break;
        }
    }

    for (index, pages, _) in scaled {
        allocations[index] = pages;
    }
}

/// 解析并校验模型输出的大纲
pub fn parse_outline(
    job_id: JobId,
    params: &BookParams,
    raw_text: &str,
) -> Result<Architecture, OutlineParseError> {
    let json = extract_json(raw_text).ok_or(OutlineParseError::NoJsonObject)?;

    let outline: RawOutline =
        serde_json::from_str(json).map_err(|e| OutlineParseError::MalformedJson(e.to_string()))?;

    if outline.chapters.is_empty() {
        return Err(OutlineParseError::EmptyChapters);
    }
    for (index, chapter) in outline.chapters.iter().enumerate() {
        if chapter.target_pages <= 0 {
            return Err(OutlineParseError::InvalidAllocation {
                index,
                pages: chapter.target_pages,
            });
        }
    }

    let mut allocations: Vec<u32> = outline
        .chapters
        .iter()
        .map(|c| c.target_pages as u32)
        .collect();
    let sum: u64 = allocations.iter().map(|p| *p as u64).sum();
    if sum == 0 {
        return Err(OutlineParseError::ZeroAllocation);
    }

    // 允许每章 ±1 页的取整误差，超出则按比例重整到目标
    let tolerance = outline.chapters.len() as u64;
    if sum.abs_diff(params.target_pages as u64) > tolerance {
        tracing::warn!(
            declared = sum,
            target = params.target_pages,
            "Outline page sum off target, renormalizing"
        );
        renormalize(&mut allocations, params.target_pages);
    }

    let chapters = outline
        .chapters
        .into_iter()
        .zip(allocations)
        .enumerate()
        .map(|(index, (raw, pages))| ChapterOutline {
            index: index as u32,
            title: raw.title,
            target_pages: pages,
            summary: raw.summary,
            recurring_refs: raw.recurring_refs,
        })
        .collect();

    let recurring_elements = outline
        .recurring_elements
        .into_iter()
        .map(|raw| RecurringElement {
            name: raw.name,
            kind: if raw.kind.is_empty() {
                "character".to_string()
            } else {
                raw.kind
            },
            description: raw.description,
        })
        .collect();

    let special_sections = outline
        .special_sections
        .into_iter()
        .map(|raw| SpecialSection {
            title: raw.title,
            placement: if raw.placement.is_empty() {
                "back".to_string()
            } else {
                raw.placement
            },
            description: raw.description,
        })
        .collect();

    Ok(Architecture::new(
        job_id,
        chapters,
        recurring_elements,
        special_sections,
    ))
}
