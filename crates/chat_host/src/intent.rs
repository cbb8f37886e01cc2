//! Pure intent classification heuristics.
//!
//! Matching is literal substring containment over fixed, mixed
//! Indonesian/English keyword tables. The tables are deliberately
//! exposed as data so tests can enumerate them exactly; behavior
//! compatibility matters more than linguistic sophistication here.

use shared::types::{CodeIntent, IntentDetection, QueryComplexity};

/// Character count above which a query is always routed to the
/// expert tier.
pub const EXPERT_LENGTH_THRESHOLD: usize = 150;

/// Messages with fewer words than this count as "short" for the
/// casual-chat rule.
pub const SHORT_MESSAGE_WORDS: usize = 5;

/// Minimum message length for artifact generation.
pub const ARTIFACT_MIN_CHARS: usize = 10;

/// Phrases signalling a deep-analysis request.
pub const DEEP_ANALYSIS_KEYWORDS: &[&str] = &[
    "explain in detail",
    "jelaskan secara detail",
    "jelaskan lengkap",
    "analisis",
    "analyze",
    "compare",
    "bandingkan",
    "research",
    "riset",
    "pros and cons",
    "kelebihan dan kekurangan",
    "step by step",
    "langkah demi langkah",
];

/// Phrases signalling a coding/dev request.
pub const DEV_KEYWORDS: &[&str] = &[
    "bug",
    "error",
    "api",
    "database",
    "kode",
    "code",
    "function",
    "fungsi",
    "deploy",
    "server",
    "algoritma",
    "algorithm",
    "refactor",
    "optimasi",
];

/// Code-creation phrases.
pub const CREATION_KEYWORDS: &[&str] = &[
    "bikin",
    "buatkan",
    "buat",
    "create",
    "build",
    "generate",
    "tolong buat",
    "website",
    "landing page",
    "aplikasi",
    "komponen",
    "script",
    "game",
    "dashboard",
    "tailwind",
];

/// Code-explanation phrases.
pub const EXPLANATION_KEYWORDS: &[&str] = &[
    "jelaskan",
    "explain",
    "apa itu",
    "what is",
    "apa bedanya",
    "perbedaan",
    "how does",
    "bagaimana cara",
    "maksud dari",
    "cara kerja",
];

/// Debugging phrases.
pub const DEBUG_KEYWORDS: &[&str] = &[
    "error",
    "bug",
    "fix",
    "perbaiki",
    "tidak jalan",
    "gak jalan",
    "not working",
    "kenapa error",
    "debug",
    "gagal",
    "stuck",
];

/// Small-talk phrases.
pub const CASUAL_KEYWORDS: &[&str] = &[
    "hai",
    "halo",
    "hello",
    "hey",
    "makasih",
    "terima kasih",
    "thanks",
    "thank you",
    "sip",
    "mantap",
    "keren",
    "wkwk",
    "haha",
    "selamat pagi",
    "selamat malam",
    "apa kabar",
];

/// Literal code syntax, matched against the original-case message.
pub const CODE_SYNTAX_TOKENS: &[&str] = &[
    "```",
    "function",
    "const ",
    "let ",
    "var ",
    "def ",
    "class ",
    "import ",
    "<div",
    "</",
    "=>",
    "print(",
    "console.log",
];

/// Binary fast/expert routing for one query.
pub fn classify_query(message: &str) -> QueryComplexity {
    if message.chars().count() > EXPERT_LENGTH_THRESHOLD {
        return QueryComplexity::Expert;
    }
    let lower = message.to_lowercase();
    let hit = DEEP_ANALYSIS_KEYWORDS
        .iter()
        .chain(DEV_KEYWORDS)
        .any(|kw| lower.contains(kw));
    if hit {
        QueryComplexity::Expert
    } else {
        QueryComplexity::Fast
    }
}

fn matched<'a>(lower: &str, table: &[&'a str]) -> Vec<&'a str> {
    table.iter().copied().filter(|kw| lower.contains(kw)).collect()
}

fn to_owned_keywords(matches: &[&str]) -> Vec<String> {
    matches.iter().map(|s| s.to_string()).collect()
}

/// Classify one user message into the closed code-intent set.
///
/// Rule order is load-bearing: the first matching rule wins, so a
/// short greeting with the word "error" in it is still casual chat.
pub fn detect_code_intent(message: &str, canvas_mode: bool) -> IntentDetection {
    let lower = message.to_lowercase();

    let creation = matched(&lower, CREATION_KEYWORDS);
    let explanation = matched(&lower, EXPLANATION_KEYWORDS);
    let debug = matched(&lower, DEBUG_KEYWORDS);
    let casual = matched(&lower, CASUAL_KEYWORDS);
    let has_code_block = CODE_SYNTAX_TOKENS.iter().any(|t| message.contains(t));
    let is_short = message.split_whitespace().count() < SHORT_MESSAGE_WORDS;

    if !casual.is_empty() && is_short {
        return IntentDetection {
            intent: CodeIntent::CasualChat,
            confidence: 90,
            keywords: to_owned_keywords(&casual),
            should_create_artifact: false,
        };
    }
    if has_code_block && !debug.is_empty() {
        return IntentDetection {
            intent: CodeIntent::CodeDebug,
            confidence: 85,
            keywords: to_owned_keywords(&debug),
            should_create_artifact: false,
        };
    }
    if creation.len() >= 2 || (!creation.is_empty() && canvas_mode) {
        return IntentDetection {
            intent: CodeIntent::CodeCreation,
            confidence: 95,
            keywords: to_owned_keywords(&creation),
            should_create_artifact: canvas_mode,
        };
    }
    if !explanation.is_empty() {
        return IntentDetection {
            intent: CodeIntent::CodeExplanation,
            confidence: 80,
            keywords: to_owned_keywords(&explanation),
            should_create_artifact: false,
        };
    }
    if creation.len() == 1 {
        return IntentDetection {
            intent: CodeIntent::CodeQuestion,
            confidence: 60,
            keywords: to_owned_keywords(&creation),
            should_create_artifact: false,
        };
    }
    IntentDetection {
        intent: CodeIntent::CodeQuestion,
        confidence: 50,
        keywords: Vec::new(),
        should_create_artifact: false,
    }
}

/// Authoritative artifact gate, consulted before rendering an
/// artifact card. Re-derives eligibility independently of
/// `IntentDetection::should_create_artifact`; the two agree except for
/// creation requests shorter than [`ARTIFACT_MIN_CHARS`].
pub fn should_generate_artifact(
    intent: CodeIntent,
    canvas_mode: bool,
    message_chars: usize,
) -> bool {
    canvas_mode && intent == CodeIntent::CodeCreation && message_chars >= ARTIFACT_MIN_CHARS
}
