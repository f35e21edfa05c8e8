//! Model catalog and served-model verification.

/// One row of the `/models` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Identifier passed as `model`.
    pub name: &'static str,
    /// Short title.
    pub title: &'static str,
    /// What the model is good at.
    pub best_for: &'static str,
}

const fn info(name: &'static str, title: &'static str, best_for: &'static str) -> ModelInfo {
    ModelInfo {
        name,
        title,
        best_for,
    }
}

/// Models the gateway is known to route.
pub const CATALOG: &[ModelInfo] = &[
    info("gpt-3.5-turbo", "Fast & Efficient", "Best for quick questions and general use"),
    info("gpt-4", "Advanced Reasoning", "Best for complex tasks and analysis"),
    info("gpt-4-mobile", "Mobile Optimized", "Optimized for mobile devices"),
    info("gpt-4-gizmo", "Gizmo Integration", "GPT-4 with gizmo capabilities"),
    info("gpt-4o", "Latest Generation", "Most advanced capabilities"),
    info("gpt-4o-mini", "Efficient GPT-4o", "Faster, cheaper GPT-4o variant"),
    info("gpt-4o-canmore", "Canmore Model", "Specialized GPT-4o variant"),
    info("gpt-4.5o", "Enhanced GPT-4o", "Advanced GPT-4o variant"),
    info("gpt-5", "Next Generation", "Future AI capabilities"),
    info("o1-preview", "Reasoning Engine", "Advanced reasoning and problem solving"),
    info("o1-mini", "Lightweight Reasoning", "Efficient reasoning capabilities"),
    info("o1", "General Reasoning", "General purpose reasoning model"),
    info("auto", "Auto Selection", "Automatically select best available model"),
];

/// Requested models the gateway maps onto a different backing identifier.
const MAPPED_FAMILIES: &[&str] = &[
    "gpt-4",
    "gpt-4o",
    "gpt-4-turbo",
    "gpt-5",
    "gpt-3.5-turbo",
    "o1-preview",
    "o1-mini",
    "claude-3-opus",
    "claude-3-sonnet",
    "claude-3-haiku",
];

/// Backing identifiers a mapped family may come back as.
const BACKING_IDENTIFIERS: &[&str] = &[
    "gpt-4-0613",
    "gpt-4-0125",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-5",
    "gpt-3.5-turbo-0125",
    "gpt-3.5-turbo-1106",
    "o1-preview",
    "o1-mini",
    "claude-3",
];

/// Decides whether the `model` a gateway reported plausibly serves `requested`.
///
/// An empty reported model never verifies.
pub fn served_model_matches(requested: &str, reported: &str) -> bool {
    if reported.is_empty() {
        return false;
    }
    if reported.contains(requested) || requested.contains(reported) {
        return true;
    }
    MAPPED_FAMILIES.contains(&requested)
        && BACKING_IDENTIFIERS.iter().any(|id| reported.contains(id))
}
