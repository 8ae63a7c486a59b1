//! Code extraction from model completions.
//!
//! Preference order:
//! 1. first fenced block whose info string names the target language
//! 2. first fenced block of any kind (info string dropped)
//! 3. the whole response, trimmed

use serde::{Deserialize, Serialize};

const FENCE: &str = "```";

/// Default info-string tags accepted for C++ blocks.
pub const CPP_TAGS: &[&str] = &["cpp", "c++", "cxx"];

/// Which strategy produced the extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    TaggedFence,
    GenericFence,
    WholeResponse,
}

/// A closed fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FencedBlock<'a> {
    /// First word of the info string, lowercased
    tag: String,
    body: &'a str,
}

/// Split out every closed, non-empty ``` block, in order.
fn fenced_blocks(response: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = response;

    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        // The info string runs to the end of the opening line.
        let (info, body_start) = match after_open.find('\n') {
            Some(nl) => (&after_open[..nl], &after_open[nl + 1..]),
            None => break,
        };
        let Some(close) = body_start.find(FENCE) else {
            break;
        };
        let body = &body_start[..close];

        // An empty body means the "opener" was a fence mentioned in prose
        // ("reply in a ```cpp block:"); rescan from the fence that closed it.
        if body.trim().is_empty() {
            rest = &body_start[close..];
            continue;
        }

        let tag = info
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        blocks.push(FencedBlock { tag, body });
        rest = &body_start[close + FENCE.len()..];
    }

    blocks
}

/// Extracts a single code block from model responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExtractor {
    /// Info-string tags that identify the target language
    language_tags: Vec<String>,
}

impl Default for CodeExtractor {
    fn default() -> Self {
        Self::new(CPP_TAGS.iter().copied())
    }
}

impl CodeExtractor {
    pub fn new<I, S>(language_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            language_tags: language_tags
                .into_iter()
                .map(|t| t.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn language_tags(&self) -> &[String] {
        &self.language_tags
    }

    /// Extract code and report which strategy matched.
    pub fn extract_with_strategy(&self, response: &str) -> (String, ExtractionStrategy) {
        let blocks = fenced_blocks(response);

        if let Some(block) = blocks
            .iter()
            .find(|b| self.language_tags.iter().any(|t| *t == b.tag))
        {
            return (block.body.trim().to_string(), ExtractionStrategy::TaggedFence);
        }

        if let Some(block) = blocks.first() {
            return (block.body.trim().to_string(), ExtractionStrategy::GenericFence);
        }

        (response.trim().to_string(), ExtractionStrategy::WholeResponse)
    }

    pub fn extract(&self, response: &str) -> String {
        self.extract_with_strategy(response).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_fence_inline() {
        let extractor = CodeExtractor::new(["lang"]);
        let (code, strategy) = extractor.extract_with_strategy("intro ```lang\nCODE\n``` outro");
        assert_eq!(code, "CODE");
        assert_eq!(strategy, ExtractionStrategy::TaggedFence);
    }

    #[test]
    fn test_no_fences_returns_trimmed_response() {
        let extractor = CodeExtractor::default();
        let response = "  int main() { return 0; }\n\n";
        let (code, strategy) = extractor.extract_with_strategy(response);
        assert_eq!(code, "int main() { return 0; }");
        assert_eq!(strategy, ExtractionStrategy::WholeResponse);
    }

    #[test]
    fn test_tagged_fence_preferred_over_earlier_generic() {
        let response = "\
Original:
```fortran
program p
end program p
```
Translation:
```cpp
int main() {}
```
";
        let (code, strategy) = CodeExtractor::default().extract_with_strategy(response);
        assert_eq!(code, "int main() {}");
        assert_eq!(strategy, ExtractionStrategy::TaggedFence);
    }

    #[test]
    fn test_cxx_alias_tag() {
        let response = "```C++\n#include <vector>\n```";
        assert_eq!(CodeExtractor::default().extract(response), "#include <vector>");
    }

    #[test]
    fn test_generic_fence_drops_info_string() {
        let response = "Here:\n```\nint x = 1;\n```\n";
        let (code, strategy) = CodeExtractor::default().extract_with_strategy(response);
        assert_eq!(code, "int x = 1;");
        assert_eq!(strategy, ExtractionStrategy::GenericFence);

        let response = "```fortran\nreal :: x\n```";
        assert_eq!(CodeExtractor::default().extract(response), "real :: x");
    }

    #[test]
    fn test_unterminated_fence_falls_back_to_whole_response() {
        let response = "```cpp\nint main() {}\n";
        let (code, strategy) = CodeExtractor::default().extract_with_strategy(response);
        assert_eq!(strategy, ExtractionStrategy::WholeResponse);
        assert_eq!(code, "```cpp\nint main() {}");
    }

    #[test]
    fn test_empty_fences_are_skipped() {
        let response = "Reply in a ```cpp block:\n```cpp\nint main() { return 0; }\n```\n";
        let (code, strategy) = CodeExtractor::default().extract_with_strategy(response);
        assert_eq!(code, "int main() { return 0; }");
        assert_eq!(strategy, ExtractionStrategy::TaggedFence);

        let response = "Use ```cpp\n```cpp\nint a;\n```\nor ```fortran\n```fortran\nreal :: b\n```";
        assert_eq!(CodeExtractor::default().extract(response), "int a;");
    }

    #[test]
    fn test_tag_must_match_whole_word() {
        let extractor = CodeExtractor::new(["c"]);
        let response = "```cpp\nint a;\n```\n```c\nint b;\n```";
        assert_eq!(extractor.extract(response), "int b;");
    }
}
