use crate::{Error, Time, STUB_UUID};

use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

/// Publicly visible information about a user
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub reputation: i64,
    pub is_admin: bool,
    pub created: Time,
}

impl User {
    pub fn can_vote(&self) -> Result<(), Error> {
        match self.reputation >= crate::VOTE_REPUTATION_THRESHOLD {
            true => Ok(()),
            false => Err(Error::ReputationTooLow {
                reputation: self.reputation,
                required: crate::VOTE_REPUTATION_THRESHOLD,
            }),
        }
    }
}

/// What a user gets to see about themselves
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UserProfile {
    pub user: User,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub password_verification: String,
}

impl NewUser {
    pub fn new(
        id: UserId,
        first_name: String,
        last_name: String,
        email: String,
        display_name: String,
        password: String,
    ) -> NewUser {
        NewUser {
            id,
            first_name,
            last_name,
            email,
            display_name,
            password_verification: password.clone(),
            password,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_bounded("first name", &self.first_name, crate::MAX_NAME_LEN)?;
        crate::validate_bounded("last name", &self.last_name, crate::MAX_NAME_LEN)?;
        crate::validate_bounded("email", &self.email, crate::MAX_EMAIL_LEN)?;
        validate_email(&self.email)?;
        crate::validate_name(&self.display_name)?;
        crate::validate_bounded("password", &self.password, usize::MAX)?;
        crate::validate_string(&self.password_verification)?;
        if self.password != self.password_verification {
            return Err(Error::PasswordMismatch);
        }
        Ok(())
    }
}

/// Creation of a user through the admin endpoint, which can set privileges
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct AdminNewUser {
    pub user: NewUser,
    pub reputation: i64,
    pub is_admin: bool,
}

fn validate_email(email: &str) -> Result<(), Error> {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None)
            if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') =>
        {
            Ok(())
        }
        _ => Err(Error::InvalidEmail(String::from(email))),
    }
}
