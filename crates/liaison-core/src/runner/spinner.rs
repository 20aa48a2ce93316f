//! Rotating labels for the animated status indicator

const VERBS: &[&str] = &[
    "Brewing",
    "Cerebrating",
    "Cogitating",
    "Computing",
    "Concocting",
    "Contemplating",
    "Crunching",
    "Deliberating",
    "Mulling",
    "Musing",
    "Noodling",
    "Percolating",
    "Pondering",
    "Processing",
    "Ruminating",
    "Simmering",
    "Synthesizing",
    "Thinking",
    "Tinkering",
    "Whirring",
];

/// Label for the n-th status tick of a turn
pub fn label(tick: usize) -> String {
    format!("{}…", VERBS[tick % VERBS.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_rotate() {
        assert_ne!(label(0), label(1));
        assert_eq!(label(0), label(VERBS.len()));
        assert!(label(3).ends_with('…'));
    }
}
