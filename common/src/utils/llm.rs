use std::sync::Arc;

use async_openai::{
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use serde_json::Value;

use crate::error::AppError;

const ANSWER_SYSTEM_MESSAGE: &str = "You are a study assistant answering questions from a \
curated knowledge base. Ground every statement in the provided context. When the context \
does not contain the answer, say so instead of guessing.";

pub fn create_user_message(context_json: &Value, query: &str) -> String {
    format!(
        r"
        Context Information:
        ==================
        {context_json}

        User Question:
        ==================
        {query}
        "
    )
}

/// Generates a grounded answer from retrieved context via the chat model.
pub async fn generate_answer(
    client: &Arc<Client<async_openai::config::OpenAIConfig>>,
    model: &str,
    context_json: &Value,
    query: &str,
) -> Result<String, AppError> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(ANSWER_SYSTEM_MESSAGE).into(),
            ChatCompletionRequestUserMessage::from(create_user_message(context_json, query)).into(),
        ])
        .build()?;

    let response = client.chat().create(request).await?;

    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or(AppError::LLMParsing(
            "No content found in LLM response".into(),
        ))
}
