use tonic::Status;

use crate::contracts::commerce::v1 as proto;
use crate::repo::{RepoError, UserLookup};

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("user not found: {0}")]
    NotFound(i64),
    #[error(transparent)]
    Repo(RepoError),
}

impl From<UserError> for Status {
    fn from(err: UserError) -> Self {
        match &err {
            UserError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
            UserError::NotFound(_) => Status::not_found(err.to_string()),
            UserError::Repo(_) => Status::unavailable(err.to_string()),
        }
    }
}

pub struct GetUserLogic<R> {
    repo: R,
}

impl<R: UserLookup> GetUserLogic<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub async fn get_user(
        &self,
        req: &proto::GetUserRequest,
    ) -> Result<proto::GetUserResponse, UserError> {
        if req.user_id <= 0 {
            return Err(UserError::InvalidArgument(format!(
                "invalid user_id: {}",
                req.user_id
            )));
        }

        let user = self.repo.get_by_id(req.user_id).await.map_err(|err| match err {
            RepoError::NotFound(id) => UserError::NotFound(id),
            other => {
                tracing::error!(user_id = req.user_id, error = %other, "user lookup failed");
                UserError::Repo(other)
            }
        })?;

        Ok(proto::GetUserResponse {
            user_id: user.id,
            username: user.username,
            mobile: user.mobile,
        })
    }
}
