// src/services/auth.rs

use std::sync::Arc;

use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    authz::{identity::SUPER_ADMIN, Identity},
    common::error::AppError,
    config::Settings,
    db::{user_repo::NewUser, AuditRepository, RbacRepository, UserRepository},
    models::auth::{AuthResponse, Claims, MeResponse, TokenKind, User, UserStatus},
};

// ---
// Máquina de bloqueio por tentativas (funções puras)
// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCheck {
    /// Pode tentar; `prior_failures` já considera um bloqueio expirado como zerado
    Proceed { prior_failures: i32 },
    Locked(DateTime<Utc>),
}

pub fn check_lock(failed_attempts: i32, locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> LockCheck {
    match locked_until {
        Some(until) if until > now => LockCheck::Locked(until),
        Some(_) => LockCheck::Proceed { prior_failures: 0 },
        None => LockCheck::Proceed { prior_failures: failed_attempts.max(0) },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

pub fn register_failure(prior_failures: i32, max_attempts: i32, lockout: Duration, now: DateTime<Utc>) -> FailureOutcome {
    let failed_attempts = prior_failures + 1;
    let locked_until = (failed_attempts >= max_attempts).then(|| now + lockout);
    FailureOutcome { failed_attempts, locked_until }
}

/// Próximo estado após uma senha errada, a partir do estado relido com a linha travada.
/// `None` quando outra tentativa concorrente já bloqueou a conta.
pub fn next_failure_state(
    failed_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    max_attempts: i32,
    lockout: Duration,
    now: DateTime<Utc>,
) -> Option<FailureOutcome> {
    match check_lock(failed_attempts, locked_until, now) {
        LockCheck::Locked(_) => None,
        LockCheck::Proceed { prior_failures } => Some(register_failure(prior_failures, max_attempts, lockout, now)),
    }
}

// ---
// Senhas (bcrypt fora do runtime async)
// ---

pub async fn hash_password(password: String) -> Result<String, AppError> {
    let hashed = tokio::task::spawn_blocking(move || hash(&password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| anyhow::anyhow!("Falha na task de hashing: {}", e))??;
    Ok(hashed)
}

pub async fn verify_password(password: String, password_hash: String) -> Result<bool, AppError> {
    let valid = tokio::task::spawn_blocking(move || verify(&password, &password_hash))
        .await
        .map_err(|e| anyhow::anyhow!("Falha na task de verificação de senha: {}", e))??;
    Ok(valid)
}

// ---
// Tokens
// ---

#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, issuer: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.to_string(),
            issuer: issuer.to_string(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    pub fn issue(&self, user: &User, kind: TokenKind) -> Result<String, AppError> {
        let now = Utc::now();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };

        let claims = Claims {
            sub: user.id,
            chain_id: user.chain_id,
            store_id: user.store_id,
            kind,
            iss: self.issuer.clone(),
            exp: (now + ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )?)
    }

    /// Verifica assinatura, validade, emissor e o tipo do token.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_ref()), &validation)
            .map_err(|_| AppError::InvalidToken)?;

        if data.claims.kind != expected {
            return Err(AppError::InvalidToken);
        }
        Ok(data.claims)
    }
}

#[derive(Clone)]
pub struct AuthService {
    user_repo: UserRepository,
    rbac_repo: RbacRepository,
    audit_repo: AuditRepository,
    settings: Arc<Settings>,
    tokens: TokenIssuer,
    pool: PgPool,
}

impl AuthService {
    pub fn new(
        user_repo: UserRepository,
        rbac_repo: RbacRepository,
        audit_repo: AuditRepository,
        settings: Arc<Settings>,
        pool: PgPool,
    ) -> Self {
        let tokens = TokenIssuer::new(
            &settings.jwt_secret,
            &settings.service_name,
            Duration::minutes(settings.access_token_ttl_minutes),
            Duration::days(settings.refresh_token_ttl_days),
        );
        Self { user_repo, rbac_repo, audit_repo, settings, tokens, pool }
    }

    pub async fn login(&self, username_or_email: &str, password: &str) -> Result<AuthResponse, AppError> {
        let user = self
            .user_repo
            .find_by_login(username_or_email.trim())
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let now = Utc::now();

        // Conta bloqueada: nem olha a senha
        if let LockCheck::Locked(until) = check_lock(user.failed_login_attempts, user.locked_until, now) {
            tracing::info!(user_id = %user.id, "Login recusado: conta bloqueada até {}", until);
            return Err(AppError::AccountLocked(until));
        }

        let is_password_valid = verify_password(password.to_owned(), user.password_hash.clone()).await?;

        if !is_password_valid {
            // Relê o contador com a linha travada: tentativas paralelas entram em fila
            let mut tx = self.pool.begin().await?;
            let (attempts, locked_until) = self.user_repo.lock_login_state(&mut *tx, user.id).await?;
            let outcome = next_failure_state(
                attempts,
                locked_until,
                self.settings.max_failed_logins,
                Duration::minutes(self.settings.lockout_minutes),
                Utc::now(),
            );
            if let Some(outcome) = outcome {
                self.user_repo
                    .record_login_failure(&mut *tx, user.id, outcome.failed_attempts, outcome.locked_until)
                    .await?;
                if let Some(until) = outcome.locked_until {
                    tracing::warn!(user_id = %user.id, attempts = outcome.failed_attempts, "🔒 Conta bloqueada até {}", until);
                }
            }
            tx.commit().await?;

            return Err(AppError::InvalidCredentials);
        }

        if user.status != UserStatus::Active {
            return Err(AppError::AccountInactive);
        }

        let mut tx = self.pool.begin().await?;
        let user = self.user_repo.record_login_success(&mut *tx, user.id, now).await?;
        self.audit_repo
            .record(&mut *tx, Some(user.id), "LOGIN", "user", Some(user.id), None)
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, "✅ Login efetuado: {}", user.username);
        self.token_pair(user)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AppError> {
        let claims = self.tokens.verify(refresh_token, TokenKind::Refresh)?;
        let user = self.load_usable_user(claims.sub).await?;
        self.token_pair(user)
    }

    /// Valida um access token e resolve a identidade com os cargos vigentes.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AppError> {
        let claims = self.tokens.verify(token, TokenKind::Access)?;
        self.resolve_identity(claims.sub).await
    }

    pub async fn resolve_identity(&self, user_id: Uuid) -> Result<Identity, AppError> {
        let user = self.load_usable_user(user_id).await?;
        let grants = self.rbac_repo.find_active_grants(user.id).await?;
        Ok(Identity::resolve(&user, grants))
    }

    pub async fn me(&self, identity: &Identity) -> Result<MeResponse, AppError> {
        let user = self
            .user_repo
            .find_by_id(identity.user_id)
            .await?
            .ok_or(AppError::NotFound("user"))?;
        let roles = self.rbac_repo.list_user_roles(user.id, true).await?;

        Ok(MeResponse {
            user,
            roles,
            permissions: identity.permissions.iter().cloned().collect(),
            is_super_admin: identity.is_super_admin(),
        })
    }

    pub async fn change_password(&self, identity: &Identity, current: &str, new_password: &str) -> Result<(), AppError> {
        let user = self
            .user_repo
            .find_by_id(identity.user_id)
            .await?
            .ok_or(AppError::NotFound("user"))?;

        if !verify_password(current.to_owned(), user.password_hash.clone()).await? {
            return Err(AppError::InvalidCredentials);
        }

        let hashed = hash_password(new_password.to_owned()).await?;

        let mut tx = self.pool.begin().await?;
        self.user_repo.update_password(&mut *tx, user.id, &hashed).await?;
        self.audit_repo
            .record(&mut *tx, Some(user.id), "CHANGE_PASSWORD", "user", Some(user.id), None)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn logout(&self, identity: &Identity) -> Result<(), AppError> {
        self.audit_repo
            .record(&self.pool, Some(identity.user_id), "LOGOUT", "user", Some(identity.user_id), None)
            .await
    }

    /// Cria o primeiro super_admin quando a base ainda não tem nenhum usuário.
    pub async fn ensure_bootstrap_admin(&self, username: &str, password: &str) -> Result<bool, AppError> {
        if self.user_repo.count_users().await? > 0 {
            return Ok(false);
        }

        let role = self
            .rbac_repo
            .find_role_by_code(SUPER_ADMIN)
            .await?
            .ok_or(AppError::NotFound("role"))?;
        let hashed = hash_password(password.to_owned()).await?;
        let email = format!("{username}@localhost");

        let mut tx = self.pool.begin().await?;
        let user = self
            .user_repo
            .create_user(
                &mut *tx,
                NewUser {
                    username,
                    email: &email,
                    password_hash: &hashed,
                    full_name: Some("Administrator"),
                    chain_id: None,
                    store_id: None,
                },
            )
            .await?;
        let assignment_id = self
            .rbac_repo
            .assign_role(&mut *tx, user.id, role.id, None, None, None, user.id)
            .await?;
        self.audit_repo
            .record(
                &mut *tx,
                Some(user.id),
                "BOOTSTRAP_ADMIN",
                "user",
                Some(user.id),
                Some(json!({ "assignmentId": assignment_id })),
            )
            .await?;
        tx.commit().await?;

        tracing::info!("👤 Usuário administrador inicial criado: {}", username);
        Ok(true)
    }

    async fn load_usable_user(&self, user_id: Uuid) -> Result<User, AppError> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::InvalidToken)?;

        if user.status != UserStatus::Active {
            return Err(AppError::AccountInactive);
        }
        if let LockCheck::Locked(until) = check_lock(user.failed_login_attempts, user.locked_until, Utc::now()) {
            return Err(AppError::AccountLocked(until));
        }
        Ok(user)
    }

    fn token_pair(&self, user: User) -> Result<AuthResponse, AppError> {
        Ok(AuthResponse {
            access_token: self.tokens.issue(&user, TokenKind::Access)?,
            refresh_token: self.tokens.issue(&user, TokenKind::Refresh)?,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl_seconds(),
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "cashier1".into(),
            email: "cashier1@example.com".into(),
            password_hash: String::new(),
            full_name: None,
            status: UserStatus::Active,
            chain_id: Some(Uuid::new_v4()),
            store_id: None,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new("test-secret", "pos-backend", Duration::minutes(60), Duration::days(7))
    }

    #[test]
    fn fifth_failure_locks_for_thirty_minutes() {
        let now = Utc::now();
        let lockout = Duration::minutes(30);

        let mut prior = 0;
        for _ in 0..4 {
            let outcome = register_failure(prior, 5, lockout, now);
            assert!(outcome.locked_until.is_none());
            prior = outcome.failed_attempts;
        }

        let outcome = register_failure(prior, 5, lockout, now);
        assert_eq!(outcome.failed_attempts, 5);
        assert_eq!(outcome.locked_until, Some(now + lockout));
    }

    #[test]
    fn serialized_failures_never_exceed_the_limit() {
        let now = Utc::now();
        let lockout = Duration::minutes(30);
        let (mut attempts, mut locked_until) = (0, None);

        // Sete tentativas erradas em paralelo, aplicadas uma a uma sob a trava da linha
        let mut recorded = 0;
        for _ in 0..7 {
            if let Some(outcome) = next_failure_state(attempts, locked_until, 5, lockout, now) {
                attempts = outcome.failed_attempts;
                locked_until = outcome.locked_until;
                recorded += 1;
            }
        }

        assert_eq!(recorded, 5);
        assert_eq!(attempts, 5);
        assert_eq!(locked_until, Some(now + lockout));
    }

    #[test]
    fn failure_after_an_expired_lock_starts_over() {
        let now = Utc::now();
        let outcome = next_failure_state(5, Some(now - Duration::minutes(1)), 5, Duration::minutes(30), now);
        assert_eq!(outcome, Some(FailureOutcome { failed_attempts: 1, locked_until: None }));
    }

    #[test]
    fn active_lock_blocks_regardless_of_counter() {
        let now = Utc::now();
        let until = now + Duration::minutes(10);
        assert_eq!(check_lock(0, Some(until), now), LockCheck::Locked(until));
    }

    #[test]
    fn expired_lock_resets_the_counter() {
        let now = Utc::now();
        let expired = now - Duration::seconds(1);
        assert_eq!(check_lock(5, Some(expired), now), LockCheck::Proceed { prior_failures: 0 });
        assert_eq!(check_lock(3, None, now), LockCheck::Proceed { prior_failures: 3 });
    }

    #[test]
    fn token_roundtrip_keeps_affiliation() {
        let user = user();
        let tokens = issuer();
        let token = tokens.issue(&user, TokenKind::Access).unwrap();

        let claims = tokens.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.chain_id, user.chain_id);
        assert_eq!(claims.iss, "pos-backend");
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let tokens = issuer();
        let refresh = tokens.issue(&user(), TokenKind::Refresh).unwrap();
        assert!(matches!(tokens.verify(&refresh, TokenKind::Access), Err(AppError::InvalidToken)));
    }

    #[test]
    fn rejects_foreign_signature_and_issuer() {
        let user = user();
        let foreign = TokenIssuer::new("other-secret", "pos-backend", Duration::minutes(5), Duration::days(1));
        let token = foreign.issue(&user, TokenKind::Access).unwrap();
        assert!(issuer().verify(&token, TokenKind::Access).is_err());

        let other_issuer = TokenIssuer::new("test-secret", "someone-else", Duration::minutes(5), Duration::days(1));
        let token = other_issuer.issue(&user, TokenKind::Access).unwrap();
        assert!(issuer().verify(&token, TokenKind::Access).is_err());
    }

    #[tokio::test]
    async fn password_hash_verifies() {
        let hashed = hash_password("s3cret-pass".into()).await.unwrap();
        assert!(verify_password("s3cret-pass".into(), hashed.clone()).await.unwrap());
        assert!(!verify_password("wrong".into(), hashed).await.unwrap());
    }
}
