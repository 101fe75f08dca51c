// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Staff-only administration of the user directory, portal cards and grants.
//!
//! Every operation requires a staff caller. Grant creation is idempotent;
//! revoking a grant that does not exist is `NotFound`.

use std::sync::Arc;
use tracing::info;

use crate::domain::error::CatalogError;
use crate::domain::portal::{CardGrant, CardId, NewCard, NewUser, PortalCard, ServiceGrant, User, UserId};
use crate::domain::rbac::Caller;
use crate::domain::repository::CatalogStore;

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn CatalogStore>,
}

/// `Forbidden` unless the caller is staff.
pub fn require_staff(caller: &Caller) -> Result<(), CatalogError> {
    if caller.is_staff {
        Ok(())
    } else {
        Err(CatalogError::Forbidden(format!(
            "user '{}' is not staff",
            caller.username
        )))
    }
}

impl AdminService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn list_users(&self, caller: &Caller) -> Result<Vec<User>, CatalogError> {
        require_staff(caller)?;
        Ok(self.store.list_users().await?)
    }

    pub async fn create_user(&self, caller: &Caller, request: NewUser) -> Result<User, CatalogError> {
        require_staff(caller)?;
        let username = request.username.trim();
        if username.is_empty() {
            return Err(CatalogError::Validation("username is required".to_string()));
        }
        // Checked up front: a unique violation would poison a Postgres transaction.
        if self.store.find_user_by_username(username).await?.is_some() {
            return Err(CatalogError::Conflict(format!("user '{}' already exists", username)));
        }

        let user = User::new(username, request.email, request.is_staff);
        let mut tx = self.store.begin().await?;
        tx.insert_user(&user).await?;
        tx.commit().await?;

        info!(user_id = %user.user_id, username = %user.username, is_staff = user.is_staff, "User created");
        Ok(user)
    }

    pub async fn delete_user(&self, caller: &Caller, user_id: UserId) -> Result<(), CatalogError> {
        require_staff(caller)?;
        if caller.user_id == user_id {
            return Err(CatalogError::Validation("cannot delete yourself".to_string()));
        }

        let mut tx = self.store.begin().await?;
        if !tx.delete_user(user_id).await? {
            return Err(CatalogError::NotFound(format!("user {}", user_id)));
        }
        tx.commit().await?;

        info!(user_id = %user_id, "User deleted");
        Ok(())
    }

    // ========================================================================
    // Portal cards
    // ========================================================================

    pub async fn list_cards(&self, caller: &Caller) -> Result<Vec<PortalCard>, CatalogError> {
        require_staff(caller)?;
        Ok(self.store.list_cards().await?)
    }

    pub async fn create_card(&self, caller: &Caller, request: NewCard) -> Result<PortalCard, CatalogError> {
        require_staff(caller)?;
        let name = request.name.trim();
        let url = request.url.trim();
        if name.is_empty() || url.is_empty() {
            return Err(CatalogError::Validation("card name and url are required".to_string()));
        }
        let linked = request.linked_twin.filter(|t| !t.as_str().trim().is_empty());

        let card = PortalCard::new(name, url, linked);
        let mut tx = self.store.begin().await?;
        tx.save_card(&card).await?;
        tx.commit().await?;

        info!(card_id = %card.card_id, name = %card.name, "Portal card created");
        Ok(card)
    }

    pub async fn delete_card(&self, caller: &Caller, card_id: CardId) -> Result<(), CatalogError> {
        require_staff(caller)?;
        let mut tx = self.store.begin().await?;
        if !tx.delete_card(card_id).await? {
            return Err(CatalogError::NotFound(format!("card {}", card_id)));
        }
        tx.commit().await?;

        info!(card_id = %card_id, "Portal card deleted");
        Ok(())
    }

    // ========================================================================
    // Card grants
    // ========================================================================

    pub async fn list_card_grants(
        &self,
        caller: &Caller,
        user: Option<UserId>,
    ) -> Result<Vec<CardGrant>, CatalogError> {
        require_staff(caller)?;
        Ok(self.store.list_card_grants(user).await?)
    }

    /// Returns `true` when the grant was newly created.
    pub async fn grant_card(&self, caller: &Caller, grant: CardGrant) -> Result<bool, CatalogError> {
        require_staff(caller)?;
        let mut tx = self.store.begin().await?;
        let created = tx.grant_card(grant.user_id, grant.card_id).await?;
        tx.commit().await?;

        info!(user_id = %grant.user_id, card_id = %grant.card_id, created, "Card granted");
        Ok(created)
    }

    pub async fn revoke_card(&self, caller: &Caller, grant: CardGrant) -> Result<(), CatalogError> {
        require_staff(caller)?;
        let mut tx = self.store.begin().await?;
        if !tx.revoke_card(grant.user_id, grant.card_id).await? {
            return Err(CatalogError::NotFound(format!(
                "grant of card {} to user {}",
                grant.card_id, grant.user_id
            )));
        }
        tx.commit().await?;

        info!(user_id = %grant.user_id, card_id = %grant.card_id, "Card grant revoked");
        Ok(())
    }

    // ========================================================================
    // Service grants
    // ========================================================================

    pub async fn list_service_grants(
        &self,
        caller: &Caller,
        user: Option<UserId>,
    ) -> Result<Vec<ServiceGrant>, CatalogError> {
        require_staff(caller)?;
        Ok(self.store.list_service_grants(user).await?)
    }

    pub async fn grant_service(&self, caller: &Caller, grant: ServiceGrant) -> Result<bool, CatalogError> {
        require_staff(caller)?;
        let mut tx = self.store.begin().await?;
        let created = tx.grant_service(grant.user_id, grant.service_id).await?;
        tx.commit().await?;

        info!(user_id = %grant.user_id, service_id = %grant.service_id, created, "Service granted");
        Ok(created)
    }

    pub async fn revoke_service(&self, caller: &Caller, grant: ServiceGrant) -> Result<(), CatalogError> {
        require_staff(caller)?;
        let mut tx = self.store.begin().await?;
        if !tx.revoke_service(grant.user_id, grant.service_id).await? {
            return Err(CatalogError::NotFound(format!(
                "grant of service {} to user {}",
                grant.service_id, grant.user_id
            )));
        }
        tx.commit().await?;

        info!(user_id = %grant.user_id, service_id = %grant.service_id, "Service grant revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryCatalogStore;

    async fn setup() -> (AdminService, Caller) {
        let store = Arc::new(InMemoryCatalogStore::new());
        let admin = User::new("admin@example.com", None, true);
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&admin).await.unwrap();
        tx.commit().await.unwrap();
        (AdminService::new(store), Caller::from(&admin))
    }

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: None,
            is_staff: false,
        }
    }

    #[tokio::test]
    async fn test_non_staff_is_forbidden() {
        let (admin, staff) = setup().await;
        let user = admin.create_user(&staff, new_user("demo@example.com")).await.unwrap();
        let caller = Caller::from(&user);

        let err = admin.list_users(&caller).await.unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (admin, staff) = setup().await;
        admin.create_user(&staff, new_user("demo@example.com")).await.unwrap();
        let err = admin
            .create_user(&staff, new_user(" demo@example.com "))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_cannot_delete_self() {
        let (admin, staff) = setup().await;
        let err = admin.delete_user(&staff, staff.user_id).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_card_requires_name_and_url() {
        let (admin, staff) = setup().await;
        let err = admin
            .create_card(
                &staff,
                NewCard {
                    name: "Lift Maintenance".into(),
                    url: "  ".into(),
                    linked_twin: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_grant_is_idempotent_and_revoke_reports_missing() {
        let (admin, staff) = setup().await;
        let card = admin
            .create_card(
                &staff,
                NewCard {
                    name: "Lift Maintenance".into(),
                    url: "http://localhost:3001".into(),
                    linked_twin: None,
                },
            )
            .await
            .unwrap();
        let grant = CardGrant {
            user_id: staff.user_id,
            card_id: card.card_id,
        };

        assert!(admin.grant_card(&staff, grant).await.unwrap());
        assert!(!admin.grant_card(&staff, grant).await.unwrap());
        assert_eq!(admin.list_card_grants(&staff, None).await.unwrap(), vec![grant]);

        admin.revoke_card(&staff, grant).await.unwrap();
        let err = admin.revoke_card(&staff, grant).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_grant_unknown_card_is_not_found() {
        let (admin, staff) = setup().await;
        let err = admin
            .grant_card(
                &staff,
                CardGrant {
                    user_id: staff.user_id,
                    card_id: CardId::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }
}
