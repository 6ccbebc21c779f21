use phreddit_api::{CommentId, Error as ApiError, Uuid};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn permission_denied() -> Error {
        Error::Api(ApiError::PermissionDenied)
    }

    pub fn not_found(uuid: Uuid) -> Error {
        Error::Api(ApiError::NotFound(uuid))
    }

    /// Another user, community, flair, post or comment was created with this id
    pub fn uuid_taken(uuid: Uuid) -> Error {
        Error::Api(ApiError::UuidAlreadyUsed(uuid))
    }

    /// A user display name or a community name is already in use
    pub fn name_taken(name: String) -> Error {
        Error::Api(ApiError::NameAlreadyUsed(name))
    }

    pub fn email_taken(email: String) -> Error {
        Error::Api(ApiError::EmailAlreadyUsed(email))
    }

    pub fn parent_not_in_post(parent: CommentId) -> Error {
        Error::Api(ApiError::ParentNotInPost(parent.0))
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                #[cfg(not(test))]
                let err =
                    ApiError::Unknown(String::from("Internal server error, see logs for details"));
                #[cfg(test)]
                let err = ApiError::Unknown(format!("Internal server error: {err:?}"));
                err
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (err.status_code(), err.contents()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use super::*;

    async fn respond(e: Error) -> (StatusCode, ApiError) {
        let resp = e.into_response();
        let status = resp.status();
        let body = hyper::body::to_bytes(resp.into_body())
            .await
            .expect("reading response body");
        (status, ApiError::parse(&body).expect("parsing error body"))
    }

    #[tokio::test]
    async fn conflicts_answer_409() {
        let id = Uuid::from_u128(7);
        assert_eq!(
            respond(Error::uuid_taken(id)).await,
            (StatusCode::CONFLICT, ApiError::UuidAlreadyUsed(id))
        );
        assert_eq!(
            respond(Error::name_taken(String::from("rust"))).await,
            (
                StatusCode::CONFLICT,
                ApiError::NameAlreadyUsed(String::from("rust"))
            )
        );
        assert_eq!(
            respond(Error::email_taken(String::from("a@example.org"))).await,
            (
                StatusCode::CONFLICT,
                ApiError::EmailAlreadyUsed(String::from("a@example.org"))
            )
        );
    }

    #[tokio::test]
    async fn misplaced_reply_is_a_bad_request() {
        let parent = CommentId(Uuid::from_u128(3));
        assert_eq!(
            respond(Error::parent_not_in_post(parent)).await,
            (StatusCode::BAD_REQUEST, ApiError::ParentNotInPost(parent.0))
        );
    }

    #[tokio::test]
    async fn internal_errors_keep_details_in_tests() {
        let (status, err) = respond(Error::Anyhow(anyhow::anyhow!("disk on fire"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        match err {
            ApiError::Unknown(msg) => assert!(msg.contains("disk on fire"), "{msg}"),
            e => panic!("unexpected error {e:?}"),
        }
    }
}
