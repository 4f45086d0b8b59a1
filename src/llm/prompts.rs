//! LLM prompts for page tree summarization.

/// Collection of prompts used to summarize tree nodes.
pub struct Prompts;

impl Prompts {
    /// Prompt to summarize the raw text of a leaf's pages.
    ///
    /// Placeholders: `{page_range}`, `{content}`.
    pub fn leaf_summary() -> &'static str {
        r#"Summarize the following excerpt of a longer document ({page_range}).

Write a concise summary (3-5 sentences) naming the main topics, entities and facts it covers. Be specific: the summary is used to find this excerpt again by similarity search.

Excerpt:
{content}

Provide ONLY the summary text, nothing else."#
    }

    /// Prompt to merge the ordered summaries of a node's children.
    ///
    /// Placeholders: `{page_range}`, `{summaries}`.
    pub fn combine_summaries() -> &'static str {
        r#"The following are summaries of consecutive sections of a document, in page order. Together they cover {page_range}.

Write one cohesive summary (4-6 sentences) of the whole span. Keep the most important topics from every section and preserve their order; do not invent information that is not in the section summaries.

Section summaries:
{summaries}

Provide ONLY the summary text, nothing else."#
    }

    /// System prompt for leaf summaries.
    pub fn system_summarizer() -> &'static str {
        "You are a careful technical editor. You write concise, informative summaries of document content."
    }

    /// System prompt for combined summaries.
    pub fn system_synthesizer() -> &'static str {
        "You are a careful technical editor. You synthesize summaries of several document sections into one cohesive overview."
    }
}
