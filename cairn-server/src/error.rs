use cairn_api::Error as ApiError;

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

    pub fn api_read_only() -> Error {
        Error::Api(ApiError::ApiReadOnly)
    }

    pub fn data_not_public() -> Error {
        Error::Api(ApiError::DataNotPublic)
    }

    pub fn id_already_used(id: i64) -> Error {
        Error::Api(ApiError::IdAlreadyUsed(id))
    }

    pub fn name_already_used(name: String) -> Error {
        Error::Api(ApiError::NameAlreadyUsed(name))
    }

    pub fn not_found(what: String) -> Error {
        Error::Api(ApiError::NotFound(what))
    }

    pub fn no_id_given() -> Error {
        Error::Api(ApiError::BadUserInput(String::from("No id was given")))
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
