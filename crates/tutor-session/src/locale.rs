//! Locale tables: the command vocabulary learners type and the text the
//! session writes back.
//!
//! Commands are matched through [`CommandVocabulary`], never by comparing
//! string literals at the call site, so the grammar can be exercised in any
//! display language.

use serde::{Deserialize, Serialize};

use crate::message::{Choice, Mistake};

// ============================================================================
// Language
// ============================================================================

/// Display language of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Language {
    /// Simplified Chinese (default).
    #[default]
    Chinese,
    /// English.
    English,
}

impl Language {
    /// Parses a language code case-insensitively.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "zh" | "zh-cn" | "chinese" => Some(Self::Chinese),
            "en" | "en-us" | "english" => Some(Self::English),
            _ => None,
        }
    }

    /// Returns the canonical language code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Chinese => "zh",
            Self::English => "en",
        }
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_code(&s).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid language '{s}': expected one of 'zh', 'en'"))
        })
    }
}

impl Serialize for Language {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

// ============================================================================
// Command vocabulary
// ============================================================================

/// How a command token is compared against learner input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchRule {
    /// Trimmed, case-folded input must equal the token.
    #[default]
    Exact,
    /// Case-folded input must contain the token.
    Contains,
}

/// Control words recognized during confirmation and guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandVocabulary {
    /// Confirms every detected mistake.
    pub select_all: Vec<String>,
    /// Discards detection results and starts over.
    pub redetect: Vec<String>,
    /// Moves guidance on to the next mistake.
    pub skip: Vec<String>,
    /// Leaves guidance mode.
    pub exit: Vec<String>,
    /// Comparison rule for `skip` and `exit`.
    #[serde(default)]
    pub match_rule: MatchRule,
}

impl CommandVocabulary {
    /// Returns the built-in vocabulary for `language`.
    #[must_use]
    pub fn for_language(language: Language) -> Self {
        let words = |list: &[&str]| list.iter().map(ToString::to_string).collect();
        match language {
            Language::Chinese => Self {
                select_all: words(&["全部"]),
                redetect: words(&["重新检测"]),
                skip: words(&["下一题", "跳过"]),
                exit: words(&["退出引导"]),
                match_rule: MatchRule::Exact,
            },
            Language::English => Self {
                select_all: words(&["all"]),
                redetect: words(&["redetect"]),
                skip: words(&["next", "skip"]),
                exit: words(&["exit"]),
                match_rule: MatchRule::Exact,
            },
        }
    }

    /// `true` if `text` is a select-all command. Always exact.
    #[must_use]
    pub fn is_select_all(&self, text: &str) -> bool {
        matches_any(&self.select_all, text, MatchRule::Exact)
    }

    /// `true` if `text` is a redetect command. Always exact.
    #[must_use]
    pub fn is_redetect(&self, text: &str) -> bool {
        matches_any(&self.redetect, text, MatchRule::Exact)
    }

    /// `true` if `text` asks to skip to the next mistake.
    #[must_use]
    pub fn is_skip(&self, text: &str) -> bool {
        matches_any(&self.skip, text, self.match_rule)
    }

    /// `true` if `text` asks to leave guidance.
    #[must_use]
    pub fn is_exit(&self, text: &str) -> bool {
        matches_any(&self.exit, text, self.match_rule)
    }
}

impl Default for CommandVocabulary {
    fn default() -> Self {
        Self::for_language(Language::default())
    }
}

fn matches_any(tokens: &[String], text: &str, rule: MatchRule) -> bool {
    let folded = text.trim().to_lowercase();
    tokens.iter().any(|token| {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            return false;
        }
        match rule {
            MatchRule::Exact => folded == token,
            MatchRule::Contains => folded.contains(&token),
        }
    })
}

// ============================================================================
// Locale
// ============================================================================

/// Language plus vocabulary: everything the session needs to talk to the
/// learner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locale {
    /// Display language for generated text.
    pub language: Language,
    /// Command words.
    pub commands: CommandVocabulary,
}

impl Locale {
    /// Creates a locale with the built-in vocabulary of `language`.
    #[must_use]
    pub fn new(language: Language) -> Self {
        Self {
            language,
            commands: CommandVocabulary::for_language(language),
        }
    }

    /// Replaces the command vocabulary.
    #[must_use]
    pub fn with_commands(mut self, commands: CommandVocabulary) -> Self {
        self.commands = commands;
        self
    }

    /// Failure text that replaces streamed content after an error.
    #[must_use]
    pub fn failure(&self, detail: &str) -> String {
        match self.language {
            Language::Chinese => format!("抱歉，{detail}"),
            Language::English => format!("Sorry, {detail}"),
        }
    }

    /// Failure text for a request that never produced a stream.
    #[must_use]
    pub fn transport_failure(&self, detail: &str) -> String {
        match self.language {
            Language::Chinese => {
                format!("抱歉，遇到了一些问题：{detail}。请稍后重试或检查后端服务。")
            }
            Language::English => {
                format!("Sorry, something went wrong: {detail}. Please retry or check the backend service.")
            }
        }
    }

    /// Failure detail for a stream that ended without any content.
    #[must_use]
    pub fn empty_response(&self) -> &'static str {
        match self.language {
            Language::Chinese => "后端没有返回任何内容",
            Language::English => "the backend returned nothing",
        }
    }

    /// Default prompt when the learner sends an image without text.
    #[must_use]
    pub fn default_question(&self) -> &'static str {
        match self.language {
            Language::Chinese => "请分析这道题目",
            Language::English => "Please analyze this question",
        }
    }

    /// Prompt written into an image-only message before detection.
    #[must_use]
    pub fn detection_prompt(&self, marks: usize) -> String {
        match (self.language, marks) {
            (Language::Chinese, 0) => "请分析这张试卷".to_string(),
            (Language::Chinese, n) => format!("我已标记了{n}道错题，请为我生成详细的学情分析。"),
            (Language::English, 0) => "Please analyze this exam paper".to_string(),
            (Language::English, n) => {
                format!("I marked {n} mistakes, please give me a detailed analysis.")
            }
        }
    }

    /// Label for the n-th (1-based) annotation mark.
    #[must_use]
    pub fn mark_label(&self, ordinal: usize) -> String {
        match self.language {
            Language::Chinese => format!("错题{ordinal}"),
            Language::English => format!("mistake {ordinal}"),
        }
    }

    /// Message shown when detection found nothing.
    #[must_use]
    pub fn no_mistakes(&self) -> &'static str {
        match self.language {
            Language::Chinese => "没有发现明显的错题标记。这张试卷看起来做得很好！",
            Language::English => "No obvious mistakes were found. This paper looks good!",
        }
    }

    /// Confirmation prompt listing detected mistakes.
    #[must_use]
    pub fn confirmation_prompt(&self, mistakes: &[Mistake]) -> String {
        let count = mistakes.len();
        let list = numbered_list(mistakes, |idx, m| match self.language {
            Language::Chinese => format!("{idx}. 题号 {}", m.label()),
            Language::English => format!("{idx}. Question {}", m.label()),
        });
        let all = first(&self.commands.select_all);
        let redetect = first(&self.commands.redetect);
        match self.language {
            Language::Chinese => format!(
                "检测到 {count} 道错题\n\n{list}\n\n请确认以上 {count} 道题是真正的错题吗？\n\n请回复:\n- 输入确认的题号 (如: 1,3) 只对这些题目进行引导\n- 或输入\"{all}\" 对所有题目进行引导\n- 或输入\"{redetect}\" 上传新的图片"
            ),
            Language::English => format!(
                "Detected {count} mistakes\n\n{list}\n\nAre these {count} questions really wrong?\n\nReply with:\n- question numbers (e.g. 1,3) to get guidance on just those\n- \"{all}\" to get guidance on all of them\n- \"{redetect}\" to upload a new image"
            ),
        }
    }

    /// Choices offered with the confirmation prompt.
    #[must_use]
    pub fn confirmation_choices(&self) -> Vec<Choice> {
        match self.language {
            Language::Chinese => vec![
                Choice::new("只对部分题目引导", "选择特定题号进行引导式学习"),
                Choice::new("全部引导", "对所有错题逐一引导"),
                Choice::new("重新检测", "上传新的试卷图片"),
            ],
            Language::English => vec![
                Choice::new("Some questions", "Pick question numbers for guided study"),
                Choice::new("All questions", "Get guidance on every mistake in turn"),
                Choice::new("Redetect", "Upload a new exam image"),
            ],
        }
    }

    /// First guidance turn, enumerating every selected mistake.
    #[must_use]
    pub fn guidance_intro(&self, mistakes: &[Mistake]) -> String {
        let count = mistakes.len();
        let first_label = mistakes.first().map_or("?", Mistake::label);
        let skip = first(&self.commands.skip);
        match self.language {
            Language::Chinese => {
                let list = numbered_list(mistakes, |idx, m| format!("{idx}. 第{}题", m.label()));
                format!(
                    "开始错题引导\n\n我将引导你逐一分析以下 {count} 道错题：\n\n{list}\n\n引导方式：我不会直接给你答案，而是通过提问引导你自己思考。\n\n---\n\n第一道题：第{first_label}题\n\n现在，请告诉我这道题的内容，或者直接上传题目图片，我会引导你一步步解答。\n\n(输入\"{skip}\"可跳过当前题目)"
                )
            }
            Language::English => {
                let list =
                    numbered_list(mistakes, |idx, m| format!("{idx}. Question {}", m.label()));
                format!(
                    "Starting guided review\n\nWe will go through these {count} mistakes one by one:\n\n{list}\n\nI will not give you the answers; I will ask questions that lead you there.\n\n---\n\nFirst: question {first_label}\n\nTell me what the question says, or upload a picture of it, and we will work through it step by step.\n\n(Type \"{skip}\" to skip the current question)"
                )
            }
        }
    }

    /// Turn shown after skipping to the next mistake.
    #[must_use]
    pub fn guidance_next(&self, skipped: &Mistake, next: &Mistake) -> String {
        match self.language {
            Language::Chinese => format!(
                "已跳过第{}题\n\n---\n\n下一道题：第{}题\n\n请告诉我这道题的内容，或上传题目图片，我会引导你一步步解答。",
                skipped.label(),
                next.label()
            ),
            Language::English => format!(
                "Skipped question {}\n\n---\n\nNext: question {}\n\nTell me what the question says, or upload a picture of it, and we will work through it step by step.",
                skipped.label(),
                next.label()
            ),
        }
    }

    /// Summary shown when every mistake has been covered.
    #[must_use]
    pub fn guidance_complete(&self, total: usize) -> String {
        match self.language {
            Language::Chinese => format!(
                "恭喜！你已经完成了所有错题的引导学习。\n\n学习总结：\n- 共学习了 {total} 道错题\n- 使用了苏格拉底式引导方法，通过提问启发思考\n\n建议：\n1. 复习今天学习到的解题方法\n2. 对错题进行整理和总结\n3. 尝试独立解答类似的题目\n\n继续加油！"
            ),
            Language::English => format!(
                "Well done! You have worked through every mistake.\n\nSummary:\n- Reviewed {total} mistakes\n- Used Socratic questioning to reason them out\n\nNext steps:\n1. Review the methods you used today\n2. Write up the mistakes you made\n3. Try similar questions on your own\n\nKeep it up!"
            ),
        }
    }

    /// Turn shown after leaving guidance.
    #[must_use]
    pub fn guidance_exited(&self) -> &'static str {
        match self.language {
            Language::Chinese => "已退出引导模式，回到普通对话。",
            Language::English => "Left guided review; back to normal chat.",
        }
    }

    /// Question text sent to the guide operation for a mistake.
    #[must_use]
    pub fn guidance_question(&self, mistake: &Mistake) -> String {
        match self.language {
            Language::Chinese => format!("第{}题", mistake.label()),
            Language::English => format!("Question {}", mistake.label()),
        }
    }

    /// Diagnosis placeholder sent before a diagnosis exists.
    #[must_use]
    pub fn undiagnosed(&self) -> &'static str {
        match self.language {
            Language::Chinese => "待诊断",
            Language::English => "not yet diagnosed",
        }
    }

    /// Default student answer for the diagnose operation.
    #[must_use]
    pub fn unknown_answer(&self) -> &'static str {
        match self.language {
            Language::Chinese => "不会做/做错了",
            Language::English => "could not solve it / got it wrong",
        }
    }

    /// Rendered diagnosis result.
    #[must_use]
    pub fn diagnosis_report(
        &self,
        knowledge_point: &str,
        error_type: &str,
        description: &str,
    ) -> String {
        match self.language {
            Language::Chinese => format!(
                "诊断结果\n\n知识点: {knowledge_point}\n错误类型: {error_type}\n\n问题分析: {description}\n\n---"
            ),
            Language::English => format!(
                "Diagnosis\n\nKnowledge point: {knowledge_point}\nError type: {error_type}\n\nAnalysis: {description}\n\n---"
            ),
        }
    }

    /// Notice shown after redetect clears the conversation.
    #[must_use]
    pub fn redetect_notice(&self) -> &'static str {
        match self.language {
            Language::Chinese => "请上传试卷图片进行检测",
            Language::English => "Upload an exam image to run detection",
        }
    }
}

fn first(tokens: &[String]) -> &str {
    tokens.first().map_or("", String::as_str)
}

fn numbered_list(mistakes: &[Mistake], line: impl Fn(usize, &Mistake) -> String) -> String {
    mistakes
        .iter()
        .enumerate()
        .map(|(idx, m)| line(idx + 1, m))
        .collect::<Vec<_>>()
        .join("\n")
}
