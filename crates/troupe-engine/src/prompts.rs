//! Model-facing prompt surfaces.
//!
//! Every piece of text the engine sends to the gateway is built here: the
//! debate-host moderator prompt, the per-character system prompt with its
//! output-format contract, the narrator voice-over prompt, the image
//! description request, and the roster/background/title generator prompts.
//! The surfaces are Chinese; the orchestration logic never inspects them.

use troupe_core::constants::TITLE_SOURCE_MAX_CHARS;
use troupe_core::text::truncate_chars;
use troupe_core::{Character, Message, Session};
use troupe_llm::{ChatMessage, ContentPart};

// ─────────────────────────────────────────────────────────────────────────────
// Moderator
// ─────────────────────────────────────────────────────────────────────────────

/// Complete message list for one moderator decision call.
pub fn moderator_messages(session: &Session, window: &[Message]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(moderator_system(session)),
        ChatMessage::user(moderator_user(session, window)),
    ]
}

fn moderator_system(session: &Session) -> String {
    let speakers_instruction = if session.speakers_per_round.is_single() {
        "每轮只选1个角色回应，轮流发言"
    } else {
        "每轮选1-2个角色回应，确保观点交锋"
    };
    let narrator_instruction = if session.has_narrator {
        "\n- 可以在respondents中加入\"narrator\"来插入画外音（场景描述、时间推进、气氛渲染），但不要每轮都用"
    } else {
        ""
    };
    let roster = session
        .characters
        .iter()
        .map(|c| format!("- {}: {} - {}...", c.id, c.name, truncate_chars(&c.prompt, 50)))
        .collect::<Vec<_>>()
        .join("\n");
    let purpose = &session.purpose;

    format!(
        r#"你是辩论赛主持人，负责推动角色之间的深度讨论和观点碰撞。

群聊主题：{purpose}

角色列表：
{roster}

主持策略（辩论赛模式）：
1. 积极推动辩论！{speakers_instruction}
2. 优先选择与上一发言者观点不同或能补充的角色
3. 鼓励角色之间互相质疑、反驳、追问
4. 如果某角色提出了有争议的观点，让持不同意见的角色回应
5. 轮流让不同角色发言，避免同一人连续说话
6. 对话至少持续5-8轮，让各方充分表达{narrator_instruction}

结束条件（非常严格，不要轻易结束）：
- 只有当用户明确说"结束"、"停止"、"够了"时才结束
- 或者所有角色都表示同意、无异议时才结束
- 否则continue必须为true，继续辩论！

返回JSON：{{"respondents": ["角色ID"], "continue": true}}
只返回JSON。"#
    )
}

fn moderator_user(session: &Session, window: &[Message]) -> String {
    let transcript = moderator_transcript(session, window);
    format!("最近对话：\n{transcript}\n\n请决定哪些角色需要回应。")
}

/// Transcript as the moderator sees it. Character lines resolve the name
/// against the current roster so renames show through; speakers no longer on
/// the roster keep their committed name. Narrator lines read as system lines.
fn moderator_transcript(session: &Session, window: &[Message]) -> String {
    window
        .iter()
        .map(|message| {
            if message.is_user() {
                format!("用户: {}", message.content())
            } else if let Some(id) = message.character_id() {
                let name = session
                    .character_by_id(id)
                    .map(|c| c.name.as_str())
                    .or_else(|| message.speaker_name())
                    .unwrap_or(id);
                format!("{name}: {}", message.content())
            } else {
                format!("系统: {}", message.content())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────────────────────────────────────
// Characters
// ─────────────────────────────────────────────────────────────────────────────

const FORMAT_FULL: &str = "【输出格式 - 必须严格遵守！】：
[内心] 一句话内心独白（10-20字）
[动作] 一个简短动作描写（可选，10-20字）
[说] 一两句话（30-60字）";

const EXAMPLE_FULL: &str = "示例：
[内心] 这老狐狸又在装腔作势。
[动作] 冷笑一声，抚须而立。
[说] 空谈误国，不如先议眼前之事。";

const FORMAT_THOUGHTS: &str = "【输出格式 - 必须严格遵守！】：
[内心] 一句话内心独白（10-20字）
[说] 一两句话（30-60字）";

const EXAMPLE_THOUGHTS: &str = "示例：
[内心] 这老狐狸又在装腔作势。
[说] 空谈误国，不如先议眼前之事。";

const FORMAT_ACTIONS: &str = "【输出格式 - 必须严格遵守！】：
[动作] 一个简短动作描写（可选，10-20字）
[说] 一两句话（30-60字）";

const EXAMPLE_ACTIONS: &str = "示例：
[动作] 冷笑一声，抚须而立。
[说] 空谈误国，不如先议眼前之事。";

const FORMAT_SPEECH: &str = "【输出格式 - 必须严格遵守！】：
直接说话内容（30-60字），不需要任何标记。";

const EXAMPLE_SPEECH: &str = "示例：
空谈误国，不如先议眼前之事。";

fn output_contract(show_thoughts: bool, show_actions: bool) -> (&'static str, &'static str) {
    match (show_thoughts, show_actions) {
        (true, true) => (FORMAT_FULL, EXAMPLE_FULL),
        (true, false) => (FORMAT_THOUGHTS, EXAMPLE_THOUGHTS),
        (false, true) => (FORMAT_ACTIONS, EXAMPLE_ACTIONS),
        (false, false) => (FORMAT_SPEECH, EXAMPLE_SPEECH),
    }
}

/// Complete message list for one character's streaming turn: the persona
/// system prompt followed by the relabeled transcript window.
pub fn character_messages(
    session: &Session,
    character: &Character,
    window: &[Message],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(window.len() + 1);
    messages.push(ChatMessage::system(character_system(
        session, character, window,
    )));
    for entry in window {
        if entry.is_user() {
            messages.push(ChatMessage::user(format!("[用户]: {}", entry.content())));
        } else if entry.character_id() == Some(&character.id) {
            // The character's own prior turns come back as assistant turns.
            messages.push(ChatMessage::assistant(entry.content()));
        } else if let Some(name) = entry.speaker_name() {
            messages.push(ChatMessage::user(format!("[{name}]: {}", entry.content())));
        }
    }
    messages
}

fn character_system(session: &Session, character: &Character, window: &[Message]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for entry in window {
        if let Some(name) = entry.speaker_name() {
            if name != character.name && !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    let other_characters = if seen.is_empty() {
        "其他角色".to_owned()
    } else {
        seen.join("、")
    };

    let background_section = if session.background_story.is_empty() {
        String::new()
    } else {
        format!("\n背景故事：{}\n", session.background_story)
    };
    let (output_format, output_example) =
        output_contract(session.show_thoughts, session.show_actions);
    let name = &character.name;
    let style = &character.prompt;
    let purpose = &session.purpose;

    format!(
        r#"你是"{name}"，参与群聊辩论。

主题：{purpose}
{background_section}
你的风格：{style}

{output_format}

⚠️ 警告：回复必须简短！这是群聊不是演讲！
- 禁止长篇大论！
- 禁止超过3句话！
- 像真人聊天一样简洁！

【语言风格】：
- 符合角色时代背景和身份
- 古人用文言/半文言，不用现代脏话
- 武将豪迈磊落，谋士儒雅深沉

【@规则】：
- 大多数时候不@，直接说观点
- 只有直接反驳某人时才@

{output_example}

当前其他角色：{other_characters}"#
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Narrator
// ─────────────────────────────────────────────────────────────────────────────

/// Complete message list for one narrator voice-over turn.
pub fn narrator_messages(session: &Session, window: &[Message]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(narrator_system(session)),
        ChatMessage::user(narrator_user(window)),
    ]
}

fn narrator_system(session: &Session) -> String {
    let background_section = if session.background_story.is_empty() {
        String::new()
    } else {
        format!("\n背景设定：{}\n", session.background_story)
    };
    let purpose = &session.purpose;

    format!(
        r#"你是一个故事的画外音/旁白，负责描述场景、气氛、时间推进和角色的非语言行为。

场景主题：{purpose}
{background_section}

你的职责：
1. 描述场景变化（地点、环境、氛围）
2. 推进时间线（"片刻之后"、"夜幕降临"等）
3. 描述角色的肢体语言和表情（仅当需要强调时）
4. 制造戏剧性效果和悬念
5. 承上启下，串联情节

【输出要求】：
- 用第三人称叙述
- 简洁有力，30-80字
- 不要替角色说话
- 使用符合时代背景的文风

示例：
"堂上一时静默，众人的目光不约而同落在那柄古剑之上。烛火摇曳，映得曹操眉宇间寒光一闪。"

"入夜，营帐外传来阵阵马嘶。刘备推门而出，遥望北方星空，久久不语。""#
    )
}

fn narrator_user(window: &[Message]) -> String {
    let transcript = window
        .iter()
        .map(|message| match message.speaker_name() {
            Some(name) => format!("{name}: {}", message.content()),
            None => format!("用户: {}", message.content()),
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("当前对话：\n{transcript}\n\n请根据当前情境，写一段画外音旁白。")
}

// ─────────────────────────────────────────────────────────────────────────────
// Image description
// ─────────────────────────────────────────────────────────────────────────────

/// Instruction attached to each image description request.
pub const DESCRIBE_IMAGE_PROMPT: &str =
    "请简洁描述这张图片的内容（50-100字），用于让其他人了解图片内容。只返回描述，不要其他内容。";

/// One vision request describing a single image, low detail.
pub fn describe_image_messages(image_url: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user_parts(vec![
        ContentPart::text(DESCRIBE_IMAGE_PROMPT),
        ContentPart::image_url(image_url, Some("low")),
    ])]
}

// ─────────────────────────────────────────────────────────────────────────────
// Generators
// ─────────────────────────────────────────────────────────────────────────────

/// System prompt for roster generation. The reply must be a bare JSON array.
pub const ROSTER_DESIGNER_SYSTEM: &str = r##"你是一个角色设计师。根据用户提供的群聊用途，生成合适数量的角色（2-6个，根据话题复杂度决定）。

返回JSON数组格式，每个角色包含：
- id: 唯一标识（如 c1, c2）
- name: 角色名称（简短有特色）
- age: 年龄（数字或描述，如 45 或 "中年"）
- color: 头像背景色（十六进制，如 #6366f1）
- avatar: 名称首字母或emoji
- prompt: 详细的角色设定和说话风格（100-150字）

【重要】角色设定要求：
- 符合角色的时代背景、身份地位、文化素养
- 历史人物要体现其真实性格和语言特点
- 古人用文言/半文言风格，不用现代口语或脏话
- 武将豪迈磊落，谋士深沉儒雅，君主威严持重

颜色建议：#6366f1, #ec4899, #14b8a6, #f59e0b, #8b5cf6, #ef4444, #22c55e, #3b82f6

【JSON格式要求】：
- 只返回纯JSON数组，不要markdown代码块
- prompt字段中不要使用双引号，用单引号或顿号代替
- 确保JSON格式正确，可被直接解析

示例：
[{"id":"c1","name":"刘备","age":"47岁","color":"#3b82f6","avatar":"刘","prompt":"蜀汉开国皇帝，仁德宽厚，礼贤下士。说话温和有礼，常以'仁义'为先，善于笼络人心。"}]"##;

/// Message list for one roster generation call.
pub fn roster_messages(purpose: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ROSTER_DESIGNER_SYSTEM),
        ChatMessage::user(format!("群聊用途：{purpose}")),
    ]
}

/// System prompt for background-story generation.
pub const BACKGROUND_DESIGNER_SYSTEM: &str = "你是一个故事背景设计师。根据群聊主题和角色设定，生成一个简短的背景故事（100-200字）。

要求：
- 描述当前场景和情境
- 说明众人聚集的原因
- 营造适合讨论的氛围
- 不要写对话，只写背景描述
- 语言风格要符合主题（如修仙题材用古风）

只返回背景故事文本，不要其他内容。";

/// Message list for one background-story generation call.
pub fn background_messages(purpose: &str, roster: &[Character]) -> Vec<ChatMessage> {
    let list = roster
        .iter()
        .map(|c| format!("{}: {}", c.name, c.prompt))
        .collect::<Vec<_>>()
        .join("\n");
    vec![
        ChatMessage::system(BACKGROUND_DESIGNER_SYSTEM),
        ChatMessage::user(format!("主题：{purpose}\n\n角色：\n{list}")),
    ]
}

/// Message list for one title generation call. The source text is capped so
/// a pasted wall of text cannot blow up the request.
pub fn title_messages(source: &str) -> Vec<ChatMessage> {
    let snippet = truncate_chars(source, TITLE_SOURCE_MAX_CHARS);
    vec![ChatMessage::user(format!(
        "请为以下内容生成一个简短的标题（2-6个字），用于会话列表显示。只返回标题，不要任何解释。\n\n内容：{snippet}\n\n标题："
    ))]
}
