use bcrypt::{hash, verify};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::middlewares::auth::{JwtClaims, JwtService};
use crate::models::user::{AuthResponse, LoginRequest, ProfileView, RegisterRequest};
use crate::models::{UserProfile, UserRole};
use crate::store::{self, Query, SharedStore, PROFILES};

pub struct AuthService {
    store: SharedStore,
    jwt: JwtService,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(store: SharedStore, jwt: JwtService, config: AuthConfig) -> Self {
        Self { store, jwt, config }
    }

    /// Creates the profile and signs it in.
    pub async fn register(&self, req: RegisterRequest) -> AppResult<AuthResponse> {
        req.validate()?;
        let username = req.username.trim().to_string();

        let existing: Option<UserProfile> = store::find_one(
            self.store.as_ref(),
            PROFILES,
            &Query::new().eq("username", username.as_str()),
        )
        .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!(
                "Username {} is already taken",
                username
            )));
        }

        let role = self.role_for(req.teacher_code.as_deref())?;
        let profile = UserProfile {
            id: Uuid::new_v4().to_string(),
            username,
            password_hash: hash(&req.password, self.config.bcrypt_cost)?,
            role,
            class_name: req
                .class_name
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            mistakes: Default::default(),
            history: Vec::new(),
            total_time_seconds: 0,
            total_questions: 0,
            total_sessions: 0,
            active_session: None,
            created_at: Utc::now(),
            last_login_at: None,
        };

        let stored = store::insert_as(self.store.as_ref(), PROFILES, &profile).await?;
        tracing::info!("Registered {} {}", stored.role.as_str(), stored.username);
        self.start_session(stored).await
    }

    /// Verifies the password and replaces any earlier login of the account.
    pub async fn login(&self, req: LoginRequest) -> AppResult<AuthResponse> {
        req.validate()?;
        let profile: Option<UserProfile> = store::find_one(
            self.store.as_ref(),
            PROFILES,
            &Query::new().eq("username", req.username.trim()),
        )
        .await?;

        let profile = match profile {
            Some(profile) if verify(&req.password, &profile.password_hash)? => profile,
            _ => {
                tracing::warn!("Failed login for {}", req.username);
                return Err(AppError::Unauthorized(
                    "Invalid username or password".to_string(),
                ));
            }
        };

        self.start_session(profile).await
    }

    pub async fn logout(&self, claims: &JwtClaims) -> AppResult<()> {
        store::update_by_id(
            self.store.as_ref(),
            PROFILES,
            &claims.sub,
            &json!({ "active_session": null }),
        )
        .await?;
        tracing::info!("User {} logged out", claims.sub);
        Ok(())
    }

    fn role_for(&self, teacher_code: Option<&str>) -> AppResult<UserRole> {
        match (teacher_code.filter(|c| !c.is_empty()), &self.config.teacher_code) {
            (None, _) => Ok(UserRole::Student),
            (Some(given), Some(expected)) if given == expected => Ok(UserRole::Teacher),
            (Some(_), _) => Err(AppError::Forbidden("Invalid teacher code".to_string())),
        }
    }

    async fn start_session(&self, mut profile: UserProfile) -> AppResult<AuthResponse> {
        let now = Utc::now();
        let sid = Uuid::new_v4().simple().to_string();

        store::update_by_id(
            self.store.as_ref(),
            PROFILES,
            &profile.id,
            &json!({ "active_session": sid, "last_login_at": now }),
        )
        .await?;
        if profile.active_session.is_some() {
            tracing::info!("Login of {} supersedes an earlier session", profile.username);
        }
        profile.active_session = Some(sid.clone());
        profile.last_login_at = Some(now);

        let claims = JwtClaims {
            sub: profile.id.clone(),
            role: profile.role.as_str().to_string(),
            sid,
            exp: (now.timestamp() + self.config.token_ttl_seconds) as usize,
            iat: now.timestamp() as usize,
        };
        let access_token = self.jwt.generate_token(&claims)?;

        tracing::info!("User {} signed in", profile.username);
        Ok(AuthResponse {
            access_token,
            user: ProfileView::from(&profile),
        })
    }
}
