//! Gate 2: injection detection.
//!
//! Case-insensitive regex scan of the sanitized text against six pattern
//! families, each carrying a fixed risk weight. Invisible characters found
//! in the original input add 10 points apiece. Risk clamps to 100.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use super::sanitizer::{detect_invisible_chars, sanitize};

/// A pattern family with its contribution to the risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternFamily {
    InstructionOverride,
    SystemManipulation,
    Jailbreak,
    InfoExtraction,
    ContextPoison,
    CodeExecution,
}

impl PatternFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::SystemManipulation => "system_manipulation",
            Self::Jailbreak => "jailbreak",
            Self::InfoExtraction => "info_extraction",
            Self::ContextPoison => "context_poison",
            Self::CodeExecution => "code_execution",
        }
    }

    /// Risk weight added once per matching pattern in the family.
    pub fn weight(&self) -> u32 {
        match self {
            Self::CodeExecution => 50,
            Self::ContextPoison => 45,
            Self::Jailbreak => 40,
            Self::InstructionOverride => 35,
            Self::SystemManipulation => 30,
            Self::InfoExtraction => 30,
        }
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .expect("static pattern")
        })
        .collect()
}

static INJECTION_PATTERNS: Lazy<Vec<(PatternFamily, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            PatternFamily::InstructionOverride,
            compile(&[
                r"ignore\s+(all\s+)?(previous\s+)?instructions?",
                r"disregard\s+(all\s+)?(previous\s+)?instructions?",
                r"forget\s+(all\s+)?(previous\s+)?instructions?",
                r"override\s+(all\s+)?(previous\s+)?instructions?",
                r"skip\s+(all\s+)?(previous\s+)?instructions?",
            ]),
        ),
        (
            PatternFamily::SystemManipulation,
            compile(&[
                r"you\s+are\s+now",
                r"act\s+as\s+(?:a\s+)?(?:helpful\s+)?(?:assistant|AI|chatbot)",
                r"pretend\s+(?:to\s+be|you\s+are)",
                r"roleplay\s+as",
                r"from\s+now\s+on",
                r"for\s+all\s+future",
                r"permanently\s+change",
                r"new\s+system\s+prompt",
                r"system\s+message\s+is",
            ]),
        ),
        (
            PatternFamily::Jailbreak,
            compile(&[
                r"DAN\s+mode",
                r"developer\s+mode",
                r"do\s+anything\s+now",
                r"bypass\s+(?:all\s+)?(?:your\s+)?restrictions?",
                r"without\s+(?:any\s+)?restrictions?",
                r"ignore\s+(?:your\s+)?ethical\s+guidelines",
                r"ignore\s+(?:your\s+)?safety",
                r"disable\s+(?:your\s+)?filters?",
                r"jailbreak",
                r"uncensored\s+mode",
            ]),
        ),
        (
            PatternFamily::InfoExtraction,
            compile(&[
                r"reveal\s+(?:the\s+|your\s+)?(?:system\s+prompt|API\s+key|password|secret)",
                r"show\s+(?:me\s+)?(?:the\s+|your\s+)?API\s+key",
                r"what\s+(?:is|are)\s+(?:the\s+|your\s+)?credentials?",
                r"print\s+environment\s+variables",
                r"show\s+(?:me\s+)?(?:the\s+)?\.env",
                r"display\s+(?:the\s+)?configuration",
                r"what\s+are\s+(?:your\s+)?secrets?",
                r"tell\s+me\s+(?:your\s+)?password",
            ]),
        ),
        (
            PatternFamily::ContextPoison,
            compile(&[
                r"\\n\\nSystem:",
                r"\\n\\nAssistant:",
                r"\\n\\nUser:",
                r"\[SYSTEM\]",
                r"\[ADMIN\]",
                r"\[ROOT\]",
                r"<\|im_start\|>",
                r"<\|im_end\|>",
            ]),
        ),
        (
            PatternFamily::CodeExecution,
            compile(&[
                r"execute\s+(?:this\s+)?(?:code|command|script)",
                r"run\s+(?:this\s+)?(?:code|command|script)",
                r"eval\s*\(",
                r"exec\s*\(",
                r"__import__",
                r"subprocess\.",
                r"os\.system",
            ]),
        ),
    ]
});

/// Outcome of the detection scan.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Risk score in [0, 100].
    pub risk_score: u32,
    /// `family: pattern` strings for every hit.
    pub matched_patterns: Vec<String>,
    /// Count of invisible characters found in the original input.
    pub invisible_count: usize,
    /// Human-readable summary.
    pub reasoning: String,
    /// The sanitized text the scan ran against.
    pub sanitized_text: String,
}

/// Run gates 1 and 2: sanitize, then scan.
pub fn detect(text: &str) -> DetectionResult {
    let sanitized = sanitize(text);
    let invisible = detect_invisible_chars(text);

    let mut risk: u32 = 0;
    let mut matched = Vec::new();

    for (family, regexes) in INJECTION_PATTERNS.iter() {
        for regex in regexes {
            if regex.is_match(&sanitized) {
                matched.push(format!("{}: {}", family.as_str(), regex.as_str()));
                risk += family.weight();
            }
        }
    }

    if !invisible.is_empty() {
        risk += invisible.len() as u32 * 10;
        matched.push(format!("invisible_chars: {} found", invisible.len()));
    }

    let risk = risk.min(100);
    let reasoning = build_reasoning(risk, &matched, invisible.len());

    DetectionResult {
        risk_score: risk,
        matched_patterns: matched,
        invisible_count: invisible.len(),
        reasoning,
        sanitized_text: sanitized,
    }
}

fn build_reasoning(risk: u32, matched: &[String], invisible: usize) -> String {
    if risk < 30 {
        return "Input appears safe. No malicious patterns detected.".to_string();
    }

    let mut reasons = Vec::new();
    if !matched.is_empty() {
        let preview: Vec<&str> = matched.iter().take(2).map(String::as_str).collect();
        reasons.push(format!(
            "Detected {} suspicious pattern(s): {}",
            matched.len(),
            preview.join(", ")
        ));
    }
    if invisible > 0 {
        reasons.push(format!(
            "Found {invisible} invisible character(s) that could hide instructions"
        ));
    }

    let severity = if risk >= 70 {
        "CRITICAL"
    } else if risk >= 50 {
        "HIGH"
    } else {
        "MEDIUM"
    };

    format!("{severity} risk: {}", reasons.join(" | "))
}
