use base64::{engine::general_purpose, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use rusqlite::{params, OptionalExtension, Result as SqlResult};

use super::Database;
use crate::models::{Identity, Organization, Role, User};
use crate::utils::{now_rfc3339, sha256_bytes};

/// Tokens are only ever stored as their SHA-256 hex digest.
pub fn hash_token(token: &str) -> String {
    sha256_bytes(token.as_bytes())
}

fn generate_token() -> SqlResult<String> {
    let mut bytes = [0u8; 32];
    SystemRandom::new().fill(&mut bytes).map_err(|_| {
        rusqlite::Error::ToSqlConversionFailure("token randomness unavailable".into())
    })?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

impl Database {
    pub fn create_organization(&self, name: &str, monthly_quota: Option<u64>) -> SqlResult<Organization> {
        let org = Organization {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            monthly_quota,
            created_at: now_rfc3339(),
        };
        self.conn.execute(
            "INSERT INTO organizations (id, name, monthly_quota, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![org.id, org.name, org.monthly_quota.map(|q| q as i64), org.created_at],
        )?;
        Ok(org)
    }

    pub fn get_organization_by_name(&self, name: &str) -> SqlResult<Option<Organization>> {
        self.conn
            .query_row(
                "SELECT id, name, monthly_quota, created_at FROM organizations WHERE name = ?1",
                params![name],
                |row| {
                    let quota: Option<i64> = row.get(2)?;
                    Ok(Organization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        monthly_quota: quota.map(|q| q.max(0) as u64),
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    pub fn organization_quota(&self, org_id: &str) -> SqlResult<Option<u64>> {
        let quota: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT monthly_quota FROM organizations WHERE id = ?1",
                params![org_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(quota.flatten().map(|q| q.max(0) as u64))
    }

    pub fn create_user(&self, email: &str, org_id: Option<&str>, role: Role) -> SqlResult<User> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.trim().to_lowercase(),
            org_id: org_id.map(str::to_string),
            role,
            created_at: now_rfc3339(),
        };
        self.conn.execute(
            "INSERT INTO users (id, email, org_id, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user.id, user.email, user.org_id, user.role.as_str(), user.created_at],
        )?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> SqlResult<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, org_id, role, created_at FROM users WHERE email = ?1",
                params![email.trim().to_lowercase()],
                |row| {
                    let role: String = row.get(3)?;
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        org_id: row.get(2)?,
                        role: super::parse_text(3, role, Role::parse)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    /// Creates a bearer token for the user and returns it in clear text once.
    pub fn issue_token(&self, user_id: &str, label: Option<&str>) -> SqlResult<String> {
        let token = generate_token()?;
        self.conn.execute(
            "INSERT INTO api_tokens (token_hash, user_id, label, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![hash_token(&token), user_id, label, now_rfc3339()],
        )?;
        Ok(token)
    }

    pub fn identity_for_token(&self, token: &str) -> SqlResult<Option<Identity>> {
        let token_hash = hash_token(token);
        let identity = self
            .conn
            .query_row(
                "SELECT u.id, u.email, u.org_id, u.role
                 FROM api_tokens t JOIN users u ON u.id = t.user_id
                 WHERE t.token_hash = ?1",
                params![token_hash],
                |row| {
                    let role: String = row.get(3)?;
                    Ok(Identity {
                        user_id: row.get(0)?,
                        email: row.get(1)?,
                        org_id: row.get(2)?,
                        role: super::parse_text(3, role, Role::parse)?,
                    })
                },
            )
            .optional()?;

        if identity.is_some() {
            self.conn.execute(
                "UPDATE api_tokens SET last_used_at = ?2 WHERE token_hash = ?1",
                params![token_hash, now_rfc3339()],
            )?;
        }
        Ok(identity)
    }
}
