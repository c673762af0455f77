//! Canned reasoning tree streamed by the simulator.

use serde::{Deserialize, Serialize};

/// Longest prompt excerpt quoted in the root node, in characters.
const PROMPT_EXCERPT_CHARS: usize = 100;

/// One node of a reasoning tree, as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub content: String,
    pub status: String,
    pub tool_used: Option<String>,
    pub depth: u32,
}

impl ReasoningNode {
    fn new(parent: Option<&ReasoningNode>, title: &str, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: parent.map(|p| p.id.clone()),
            title: title.to_string(),
            content: content.into(),
            status: "complete".to_string(),
            tool_used: None,
            depth: parent.map_or(0, |p| p.depth + 1),
        }
    }

    fn with_tool(mut self, tool: &str) -> Self {
        self.tool_used = Some(tool.to_string());
        self
    }
}

fn excerpt(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(PROMPT_EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Build the ten-node tree for `prompt`, parents before children.
pub fn build_reasoning_tree(prompt: &str) -> Vec<ReasoningNode> {
    let root = ReasoningNode::new(
        None,
        "Analyzing request",
        format!("Processing the task: {}", excerpt(prompt)),
    );

    let approach = ReasoningNode::new(
        Some(&root),
        "Define approach",
        "Breaking down the problem into manageable components and identifying the best strategy.",
    );
    let requirements = ReasoningNode::new(
        Some(&approach),
        "Analyze requirements",
        "Identified key requirements: accuracy, relevance, and comprehensive coverage of the topic.",
    );
    let plan = ReasoningNode::new(
        Some(&approach),
        "Plan execution",
        "Will proceed with parallel search followed by synthesis and summarization.",
    );

    let search = ReasoningNode::new(
        Some(&root),
        "Execute search",
        "Launching parallel search across multiple knowledge sources.",
    )
    .with_tool("ParallelSearch");
    let primary = ReasoningNode::new(
        Some(&search),
        "Query primary sources",
        "Retrieved relevant information from primary knowledge base with high confidence scores.",
    );
    let secondary = ReasoningNode::new(
        Some(&search),
        "Query secondary sources",
        "Found supplementary information to provide additional context and verification.",
    );

    let synthesize = ReasoningNode::new(
        Some(&root),
        "Synthesize results",
        "Combining and cross-referencing information from all sources.",
    );
    let cross_reference = ReasoningNode::new(
        Some(&synthesize),
        "Cross-reference findings",
        "Validated consistency across sources. No conflicting information detected.",
    );

    let response = ReasoningNode::new(
        Some(&root),
        "Generate response",
        "Compiled final response with synthesized information and supporting details.",
    );

    vec![
        root,
        approach,
        requirements,
        plan,
        search,
        primary,
        secondary,
        synthesize,
        cross_reference,
        response,
    ]
}
