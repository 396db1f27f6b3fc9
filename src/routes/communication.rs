use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::middleware::{AuthMiddleware, AuthUser};
use crate::models::message::MessageResponse;
use crate::models::user::UserPublicResponse;
use crate::realtime::conversation::conversation_id_for;
use crate::realtime::events::{MessageDeletedPayload, ServerEvent};
use crate::services::message::MessageService;
use crate::services::user::UserService;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    conversation_id: String,
    messages: Vec<MessageResponse>,
}

pub fn create_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/users")
            .wrap(AuthMiddleware)
            .route(web::get().to(get_chat_users)),
    )
    .service(
        web::resource("/history/{user_id}")
            .wrap(AuthMiddleware)
            .route(web::get().to(get_conversation_history)),
    )
    .service(
        web::resource("/messages/{message_id}")
            .wrap(AuthMiddleware)
            .route(web::delete().to(delete_message)),
    );
}

/// GET /users - everyone the caller can start a conversation with.
async fn get_chat_users(
    state: web::Data<AppState>,
    auth_user: AuthUser,
) -> AppResult<HttpResponse> {
    let user_service = UserService::new(&state.db);
    let users = user_service.get_users_excluding(auth_user.id()).await?;

    Ok(HttpResponse::Ok().json(users))
}

/// GET /history/{user_id} - the full conversation between the caller and
/// the given user, oldest first, each message carrying its sender's public
/// profile.
async fn get_conversation_history(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let other_user_id = path.into_inner();
    let conversation_id = conversation_id_for(auth_user.id(), &other_user_id);

    let message_service = MessageService::new(&state.db);
    let user_service = UserService::new(&state.db);

    let messages = message_service
        .get_conversation_messages(&conversation_id)
        .await?;

    // Both participants' public profiles cover every sender in a two-party
    // conversation
    let caller: Option<UserPublicResponse> = user_service
        .get_user_by_id(auth_user.id())
        .await?
        .map(UserPublicResponse::from);
    let other: Option<UserPublicResponse> = user_service
        .get_user_by_id(&other_user_id)
        .await?
        .map(UserPublicResponse::from);

    let messages = messages
        .into_iter()
        .map(|message| {
            let sender = if message.sender_id == auth_user.id() {
                caller.clone()
            } else if message.sender_id == other_user_id {
                other.clone()
            } else {
                None
            };

            let mut response = MessageResponse::from(message);
            response.sender = sender;
            response
        })
        .collect();

    Ok(HttpResponse::Ok().json(HistoryResponse {
        conversation_id,
        messages,
    }))
}

/// DELETE /messages/{message_id} - remove a message the caller sent. The
/// HTTP surface answers 403 whether the message belongs to someone else or
/// does not exist, so callers cannot probe for message ids.
async fn delete_message(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let message_id = path.into_inner();

    let message_service = MessageService::new(&state.db);
    let message = message_service
        .get_message_by_id(&message_id)
        .await?
        .filter(|m| m.sender_id == auth_user.id())
        .ok_or_else(|| AppError::Forbidden("Cannot delete this message".to_string()))?;

    message_service.delete_message(&message.id).await?;

    // Live subscribers hear about the removal too
    state
        .events
        .broadcast_to_room(
            &message.conversation_id,
            &ServerEvent::MessageDeleted(MessageDeletedPayload {
                message_id: message.id.clone(),
            }),
            None,
        )
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": message.id })))
}
