//! Store keys of a project's chapter artifacts.

/// Project progress record.
pub const PROJECT_META_KEY: &str = "project_meta.json";

/// `chapters/NNN.md`
pub fn chapter_key(chapter_index: u32) -> String {
    format!("chapters/{:03}.md", chapter_index)
}

/// `reviews/chapter_NNN.vV.json`
pub fn review_key(chapter_index: u32, writer_version: u32) -> String {
    format!("reviews/chapter_{:03}.v{}.json", chapter_index, writer_version)
}

/// `chapters/NNN.error.json`
pub fn chapter_error_key(chapter_index: u32) -> String {
    format!("chapters/{:03}.error.json", chapter_index)
}

/// `chapters/NNN.advisor.json`
pub fn advisor_key(chapter_index: u32) -> String {
    format!("chapters/{:03}.advisor.json", chapter_index)
}

/// `restate/chapters/NNN.vV.md`; version 1 is the chapter as it was.
pub fn restate_draft_key(chapter_index: u32, writer_version: u32) -> String {
    format!("restate/chapters/{:03}.v{}.md", chapter_index, writer_version)
}

/// `restate/chapters/NNN.vV.editor.json`
pub fn restate_review_key(chapter_index: u32, writer_version: u32) -> String {
    format!("restate/chapters/{:03}.v{}.editor.json", chapter_index, writer_version)
}

/// `memory/chapters/NNN.memory.json`
pub fn memory_key(chapter_index: u32) -> String {
    format!("memory/chapters/{:03}.memory.json", chapter_index)
}

/// `memory/arcs/arc_SSS-EEE.json`
pub fn arc_key(start_chapter: u32, end_chapter: u32) -> String {
    format!("memory/arcs/arc_{:03}-{:03}.json", start_chapter, end_chapter)
}
