use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{
    OpenApi,
    param::{Path, Query},
    payload::Json,
};

use crate::{
    application::usecases::{CreateMessageCommand, ListMessagesQuery},
    presentation::{
        http::{
            endpoints::root::{ApiState, EndpointsTags},
            mappers::{domain_error, map_message},
            requests::CreateMessageRequestDto,
            responses::{MessageDto, MessageListDto},
            security::ApiKeyAuth,
        },
        models::MessageStatusDto,
    },
};

#[derive(Clone)]
pub struct MessagesEndpoints {
    state: Arc<ApiState>,
}

impl MessagesEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl MessagesEndpoints {
    #[oai(
        path = "/messages",
        method = "post",
        tag = EndpointsTags::Messages,
    )]
    pub async fn create_message(
        &self,
        auth: ApiKeyAuth,
        request: Json<CreateMessageRequestDto>,
    ) -> PoemResult<Json<MessageDto>> {
        auth.authorize(&self.state.api_key)?;

        let Json(request) = request;
        let message = self
            .state
            .management
            .create_message(CreateMessageCommand {
                phone_number: request.phone_number,
                content: request.content,
            })
            .await
            .map_err(domain_error)?;

        Ok(Json(map_message(&message)))
    }

    /// Without a status filter, pending messages are listed.
    #[oai(
        path = "/messages",
        method = "get",
        tag = EndpointsTags::Messages,
    )]
    pub async fn list_messages(
        &self,
        auth: ApiKeyAuth,
        status: Query<Option<MessageStatusDto>>,
        limit: Query<Option<i64>>,
        offset: Query<Option<i64>>,
    ) -> PoemResult<Json<MessageListDto>> {
        auth.authorize(&self.state.api_key)?;

        let listing = self
            .state
            .management
            .list_messages(ListMessagesQuery {
                status: status.0.map(Into::into),
                limit: limit.0.unwrap_or(0),
                offset: offset.0.unwrap_or(0),
            })
            .await
            .map_err(domain_error)?;

        Ok(Json(MessageListDto {
            messages: listing.messages.iter().map(map_message).collect(),
            total_count: listing.total_count,
            has_more: listing.has_more,
        }))
    }

    #[oai(
        path = "/messages/:message_id",
        method = "get",
        tag = EndpointsTags::Messages,
    )]
    pub async fn get_message(
        &self,
        auth: ApiKeyAuth,
        message_id: Path<String>,
    ) -> PoemResult<Json<MessageDto>> {
        auth.authorize(&self.state.api_key)?;

        let message = self
            .state
            .management
            .get_message_by_id(&message_id.0)
            .await
            .map_err(domain_error)?;

        Ok(Json(map_message(&message)))
    }
}
