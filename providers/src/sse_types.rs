//! Typed SSE payloads for each provider.
//!
//! Unknown event and block types deserialize into `Unknown` variants so new
//! server-side features never break an older client.

pub mod claude {
    use serde::Deserialize;

    /// Anthropic Messages stream event, tagged by `type`.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Event {
        MessageStart {},
        MessageDelta {
            #[serde(default)]
            delta: Option<MessageDeltaInfo>,
        },
        ContentBlockStart {
            index: u32,
            content_block: ContentBlock,
        },
        ContentBlockDelta {
            index: u32,
            delta: Delta,
        },
        ContentBlockStop {
            index: u32,
        },
        MessageStop,
        Ping,
        Error {
            error: ErrorInfo,
        },
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default, rename = "type")]
        pub error_type: String,
        #[serde(default)]
        pub message: String,
    }

    #[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
    #[serde(rename_all = "snake_case")]
    pub enum StopReason {
        EndTurn,
        MaxTokens,
        StopSequence,
        ToolUse,
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessageDeltaInfo {
        #[serde(default)]
        pub stop_reason: Option<StopReason>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ContentBlock {
        Text {
            #[serde(default)]
            text: String,
        },
        ToolUse {
            id: String,
            name: String,
        },
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Delta {
        TextDelta { text: String },
        InputJsonDelta { partial_json: String },
        #[serde(other)]
        Unknown,
    }

}

pub mod openai {
    //! Chat Completions streaming chunks (`chat.completion.chunk`).
    //!
    //! xAI serves the same format from its own base URL.

    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct Chunk {
        #[serde(default)]
        pub choices: Vec<Choice>,
        #[serde(default)]
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default)]
        pub message: String,
        #[serde(default, rename = "type")]
        pub error_type: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Choice {
        #[serde(default)]
        pub index: u32,
        #[serde(default)]
        pub delta: ChoiceDelta,
        #[serde(default)]
        pub finish_reason: Option<FinishReason>,
    }

    #[derive(Debug, Deserialize, Default)]
    pub struct ChoiceDelta {
        #[serde(default)]
        pub content: Option<String>,
        #[serde(default)]
        pub tool_calls: Option<Vec<ToolCallDelta>>,
    }

    /// One fragment of a streamed tool call. Only the first fragment for an
    /// `index` carries `id` and the function name.
    #[derive(Debug, Deserialize)]
    pub struct ToolCallDelta {
        pub index: u32,
        #[serde(default)]
        pub id: Option<String>,
        #[serde(default)]
        pub function: Option<FunctionDelta>,
    }

    #[derive(Debug, Deserialize, Default)]
    pub struct FunctionDelta {
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub arguments: Option<String>,
    }

    #[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
    #[serde(rename_all = "snake_case")]
    pub enum FinishReason {
        Stop,
        Length,
        ToolCalls,
        ContentFilter,
        #[serde(other)]
        Unknown,
    }

}
