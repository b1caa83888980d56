//! Prompt Builders - 各阶段生成请求的构造
//!
//! 纯函数：参数进，角色化消息列表出。
//! 分块提示词只携带前一分块的尾部作为衔接上下文，
//! 不回读整部手稿。

use crate::application::ports::{ArchitectureFeedback, Message};
use crate::domain::book::{Architecture, BookParams};
use crate::domain::ChunkDescriptor;

/// 衔接上下文携带的前文尾部长度（字符）
const CONTINUITY_TAIL_CHARS: usize = 2000;

/// 大纲阶段的系统指令
fn architect_system(params: &BookParams) -> String {
    format!(
        "You are a book architect. Design the structure of a complete book. \
         Respond with a single JSON object and nothing else, using this shape:\n\
         {{\n\
           \"chapters\": [\n\
             {{\"title\": \"...\", \"target_pages\": N, \"summary\": \"...\", \
             \"recurring_refs\": [\"...\"]}}\n\
           ],\n\
           \"recurring_elements\": [{{\"name\": \"...\", \"kind\": \"character|case_study\", \
           \"description\": \"...\"}}],\n\
           \"special_sections\": [{{\"title\": \"...\", \"placement\": \
           \"front|back|per_chapter\", \"description\": \"...\"}}]\n\
         }}\n\
         Produce exactly {} chapters. The target_pages values must sum to {}. \
         Write everything in language code '{}'.",
        params.target_chapters, params.target_pages, params.language
    )
}

fn book_brief(params: &BookParams) -> String {
    let mut brief = format!(
        "Title: {}\nGenre: {}\nAudience: {}\nTone: {}\nTarget length: {} pages in {} chapters.",
        params.title,
        params.genre,
        params.audience,
        params.tone,
        params.target_pages,
        params.target_chapters
    );
    if !params.topics.is_empty() {
        brief.push_str(&format!("\nTopics to cover: {}.", params.topics.join(", ")));
    }
    if !params.format_hints.is_empty() {
        brief.push_str(&format!(
            "\nFormat preferences: {}.",
            params.format_hints.join(", ")
        ));
    }
    brief
}

/// 构建大纲生成请求
pub fn architecture_prompt(params: &BookParams) -> Vec<Message> {
    vec![
        Message::system(architect_system(params)),
        Message::user(book_brief(params)),
    ]
}

/// 构建大纲重生成请求（注入上一版大纲和两段用户反馈）
pub fn regeneration_prompt(
    params: &BookParams,
    prior: &Architecture,
    feedback: &ArchitectureFeedback,
) -> Vec<Message> {
    let prior_json = serde_json::to_string_pretty(&prior.chapters).unwrap_or_default();

    vec![
        Message::system(architect_system(params)),
        Message::user(book_brief(params)),
        Message::assistant(prior_json),
        Message::user(format!(
            "The reader rejected this outline.\n\
             What didn't work: {}\n\
             What to change: {}\n\
             Produce a revised outline as the same JSON shape, keeping what was not criticized.",
            feedback.dislike, feedback.change
        )),
    ]
}

/// 大纲的紧凑文字摘要（分块提示词复用）
fn outline_digest(architecture: &Architecture) -> String {
    let mut digest = String::new();
    for chapter in &architecture.chapters {
        digest.push_str(&format!(
            "{}. {} ({} pages): {}\n",
            chapter.index + 1,
            chapter.title,
            chapter.target_pages,
            chapter.summary
        ));
    }
    if !architecture.recurring_elements.is_empty() {
        digest.push_str("Recurring elements: ");
        digest.push_str(
            &architecture
                .recurring_elements
                .iter()
                .map(|e| format!("{} ({})", e.name, e.kind))
                .collect::<Vec<_>>()
                .join(", "),
        );
        digest.push('\n');
    }
    digest
}

/// 构建分块正文生成请求
pub fn chunk_prompt(
    params: &BookParams,
    architecture: &Architecture,
    chunk: &ChunkDescriptor,
    previous_tail: Option<&str>,
) -> Vec<Message> {
    let chapters = &architecture.chapters[chunk.chapter_start..chunk.chapter_end];
    let chapter_list = chapters
        .iter()
        .map(|c| format!("- Chapter {}: {} ({} pages)", c.index + 1, c.title, c.target_pages))
        .collect::<Vec<_>>()
        .join("\n");

    let mut user = format!(
        "Write the full prose for the following chapters of \"{}\":\n{}\n\n\
         Total target length for this section: {} pages. \
         Start each chapter with a markdown heading line: \"# Chapter N: Title\". \
         Do not repeat chapters that were already written, and do not write chapters \
         outside this range.",
        params.title, chapter_list, chunk.target_pages
    );

    if let Some(tail) = previous_tail {
        let tail: String = tail
            .chars()
            .rev()
            .take(CONTINUITY_TAIL_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        user.push_str(&format!(
            "\n\nThe book so far ends with the following passage. Continue seamlessly \
             from it without repeating it:\n---\n{}\n---",
            tail
        ));
    }

    vec![
        Message::system(format!(
            "You are writing the manuscript of a {} book for a {} audience, tone: {}. \
             Full outline for reference:\n{}",
            params.genre,
            params.audience,
            params.tone,
            outline_digest(architecture)
        )),
        Message::user(user),
    ]
}

/// 构建有机扩写请求（延展已有内容补足页数，不重写）
pub fn expansion_prompt(
    params: &BookParams,
    chunk: &ChunkDescriptor,
    existing_text: &str,
    shortfall_pages: f64,
) -> Vec<Message> {
    let tail: String = existing_text
        .chars()
        .rev()
        .take(CONTINUITY_TAIL_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    vec![
        Message::system(format!(
            "You are expanding an existing section of the book \"{}\". \
             Deepen and extend the material organically: add detail, examples and \
             development inside the chapters already present. Never introduce new \
             chapters or new headings, never summarize, never repeat existing text.",
            params.title
        )),
        Message::user(format!(
            "This section covers chapters {}-{} and is about {:.1} pages short of its \
             target. It currently ends with:\n---\n{}\n---\n\
             Continue directly from this point with new prose that belongs to the same \
             final chapter.",
            chunk.chapter_start + 1,
            chunk.chapter_end,
            shortfall_pages,
            tail
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::book::{ChapterOutline, JobId};
    use crate::domain::ChunkingConfig;

    fn params() -> BookParams {
        BookParams {
            title: "Deep Oceans".to_string(),
            genre: "science".to_string(),
            audience: "general".to_string(),
            tone: "accessible".to_string(),
            topics: vec!["hydrothermal vents".to_string()],
            target_pages: 80,
            target_chapters: 12,
            language: "en".to_string(),
            format_hints: vec![],
        }
    }

    fn architecture() -> Architecture {
        let chapters = (0..12)
            .map(|i| ChapterOutline {
                index: i,
                title: format!("Topic {}", i + 1),
                target_pages: if i < 8 { 7 } else { 6 },
                summary: "summary".to_string(),
                recurring_refs: vec![],
            })
            .collect();
        Architecture::new(JobId::new(), chapters, vec![], vec![])
    }

    #[test]
    fn test_architecture_prompt_binds_structure() {
        let messages = architecture_prompt(&params());
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("12 chapters"));
        assert!(messages[0].content.contains("sum to 80"));
        assert!(messages[1].content.contains("Deep Oceans"));
        assert!(messages[1].content.contains("hydrothermal vents"));
    }

    #[test]
    fn test_regeneration_prompt_injects_feedback() {
        let arch = architecture();
        let messages = regeneration_prompt(
            &params(),
            &arch,
            &ArchitectureFeedback {
                dislike: "chapters feel repetitive".to_string(),
                change: "merge chapters 3 and 4".to_string(),
            },
        );

        assert_eq!(messages.len(), 4);
        let last = &messages[3].content;
        assert!(last.contains("chapters feel repetitive"));
        assert!(last.contains("merge chapters 3 and 4"));
    }

    #[test]
    fn test_chunk_prompt_scopes_chapter_range() {
        let arch = architecture();
        let plan = crate::domain::distribute(&arch, &ChunkingConfig::default());
        let chunk = &plan.chunks[1];

        let messages = chunk_prompt(&params(), &arch, chunk, Some("...the previous text."));
        let user = &messages[1].content;

        // 只要求本块的章节
        assert!(user.contains(&format!("Chapter {}:", chunk.chapter_start + 1)));
        assert!(!user.contains("Chapter 1:"));
        assert!(user.contains("Continue seamlessly"));
        assert!(user.contains("the previous text."));
    }

    #[test]
    fn test_expansion_prompt_forbids_new_headings() {
        let arch = architecture();
        let plan = crate::domain::distribute(&arch, &ChunkingConfig::default());

        let messages = expansion_prompt(&params(), &plan.chunks[0], "existing prose", 2.5);
        assert!(messages[0].content.contains("Never introduce new"));
        assert!(messages[1].content.contains("2.5 pages short"));
    }

    #[test]
    fn test_continuity_tail_truncated() {
        let arch = architecture();
        let plan = crate::domain::distribute(&arch, &ChunkingConfig::default());
        let long_text = "x".repeat(10_000);

        let messages = chunk_prompt(&params(), &arch, &plan.chunks[1], Some(&long_text));
        // 只带尾部，不搬运全文
        assert!(messages[1].content.len() < 5_000);
    }
}
