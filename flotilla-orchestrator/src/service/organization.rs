//! Organization Service
//!
//! Organizations hold the token budget instance groups draw from. Balance
//! updates are version-checked and retried, since several instance groups of
//! the same organization may settle at once.

use flotilla_core::domain::EntityKind;
use flotilla_core::domain::organization::Organization;
use flotilla_core::dto::organization::CreateOrganization;
use uuid::Uuid;

use super::error::{Result, ServiceError};
use crate::repository::{self, Store, organization_repository};

/// Attempts made to apply a balance change before giving up
const BALANCE_RETRIES: usize = 8;

/// Create a new organization
pub async fn create(store: &dyn Store, req: CreateOrganization) -> Result<Organization> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation(
            "Organization name cannot be empty".to_string(),
        ));
    }
    if req.token_amount < 0 {
        return Err(ServiceError::Validation(
            "Initial token amount cannot be negative".to_string(),
        ));
    }

    let org = repository::insert(store, &Organization::new(name, req.memo, req.token_amount)).await?;
    tracing::info!("Organization created: {} ({})", org.name, org.id);
    Ok(org)
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<Organization> {
    organization_repository::find_by_id(store, id)
        .await?
        .ok_or(ServiceError::not_found(EntityKind::Organization, id))
}

pub async fn list(store: &dyn Store) -> Result<Vec<Organization>> {
    Ok(organization_repository::list_all(store).await?)
}

/// Add `delta` tokens (remove when negative); the balance may not drop below zero
pub async fn adjust_tokens(store: &dyn Store, id: Uuid, delta: i64) -> Result<Organization> {
    let org = apply(store, id, |org| {
        let next = org.token_amount.checked_add(delta).ok_or_else(|| {
            ServiceError::Validation("Token amount overflows".to_string())
        })?;
        if next < 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "organization {} holds {} tokens, cannot remove {}",
                id, org.token_amount, -delta
            )));
        }
        org.token_amount = next;
        Ok(true)
    })
    .await?;

    tracing::info!("Organization {} token amount is now {}", id, org.token_amount);
    Ok(org)
}

/// Charge `consumed` tokens (refund when negative)
///
/// Spending follows instance groups that already changed size, so the balance
/// is allowed to go negative here.
pub async fn spend(store: &dyn Store, id: Uuid, consumed: i64) -> Result<Organization> {
    let org = apply(store, id, |org| {
        org.token_amount = org.token_amount.saturating_sub(consumed);
        Ok(true)
    })
    .await?;
    tracing::debug!(
        "Organization {} spent {} tokens, {} left",
        id,
        consumed,
        org.token_amount
    );
    Ok(org)
}

/// Charge the outcome of one instance group operation, at most once
///
/// The operation is recorded in the same write as the balance; a second call
/// for the same operation leaves the organization untouched.
pub async fn spend_for_operation(
    store: &dyn Store,
    id: Uuid,
    instance_group_id: Uuid,
    operation_id: Uuid,
    consumed: i64,
) -> Result<Organization> {
    let org = apply(store, id, |org| {
        if org.has_settled(instance_group_id, operation_id) {
            return Ok(false);
        }
        org.token_amount = org.token_amount.saturating_sub(consumed);
        org.settlements.insert(instance_group_id, operation_id);
        Ok(true)
    })
    .await?;
    tracing::debug!(
        "Organization {} settled operation {} of instance group {}, {} tokens left",
        id,
        operation_id,
        instance_group_id,
        org.token_amount
    );
    Ok(org)
}

/// Drop the charge record of an instance group that no longer exists
pub async fn forget_settlement(store: &dyn Store, id: Uuid, instance_group_id: Uuid) -> Result<()> {
    apply(store, id, |org| Ok(org.settlements.remove(&instance_group_id).is_some())).await?;
    Ok(())
}

/// Refuse unless the organization can afford `required` more tokens
pub async fn require_tokens(store: &dyn Store, id: Uuid, required: i64) -> Result<()> {
    let org = get(store, id).await?;
    if org.token_amount < required {
        return Err(ServiceError::InvalidOperation(format!(
            "organization {} has insufficient tokens: {} required, {} available",
            id, required, org.token_amount
        )));
    }
    Ok(())
}

/// Version-checked read-modify-write; `change` returns false to skip the write
async fn apply<F>(store: &dyn Store, id: Uuid, change: F) -> Result<Organization>
where
    F: Fn(&mut Organization) -> Result<bool>,
{
    let mut attempt = 0;
    loop {
        let mut org = get(store, id).await?;
        if !change(&mut org)? {
            return Ok(org);
        }
        match repository::update(store, &org).await {
            Ok(org) => return Ok(org),
            Err(repository::StoreError::Conflict { .. }) if attempt + 1 < BALANCE_RETRIES => {
                attempt += 1;
                tracing::debug!("Retrying balance update of organization {}", id);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    fn request(name: &str, token_amount: i64) -> CreateOrganization {
        CreateOrganization {
            name: name.to_string(),
            memo: None,
            token_amount,
        }
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let store = MemoryStore::new();
        assert!(matches!(
            create(&store, request("  ", 10)).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            create(&store, request("acme", -1)).await,
            Err(ServiceError::Validation(_))
        ));

        let org = create(&store, request(" acme ", 10)).await.unwrap();
        assert_eq!(org.name, "acme");
        assert_eq!(list(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_adjust_refuses_negative_balance() {
        let store = MemoryStore::new();
        let org = create(&store, request("acme", 10)).await.unwrap();

        let org = adjust_tokens(&store, org.id, 5).await.unwrap();
        assert_eq!(org.token_amount, 15);

        let err = adjust_tokens(&store, org.id, -20).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));
        assert_eq!(get(&store, org.id).await.unwrap().token_amount, 15);
    }

    #[tokio::test]
    async fn test_spend_and_refund() {
        let store = MemoryStore::new();
        let org = create(&store, request("acme", 10)).await.unwrap();

        spend(&store, org.id, 4).await.unwrap();
        assert_eq!(get(&store, org.id).await.unwrap().token_amount, 6);

        spend(&store, org.id, -4).await.unwrap();
        assert_eq!(get(&store, org.id).await.unwrap().token_amount, 10);

        assert!(require_tokens(&store, org.id, 10).await.is_ok());
        assert!(matches!(
            require_tokens(&store, org.id, 11).await,
            Err(ServiceError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_operation_is_charged_once() {
        let store = MemoryStore::new();
        let org = create(&store, request("acme", 10)).await.unwrap();
        let (ig, op) = (Uuid::new_v4(), Uuid::new_v4());

        spend_for_operation(&store, org.id, ig, op, 3).await.unwrap();
        let again = spend_for_operation(&store, org.id, ig, op, 3).await.unwrap();
        assert_eq!(again.token_amount, 7);

        // The next operation of the same group is charged again
        let refunded = spend_for_operation(&store, org.id, ig, Uuid::new_v4(), -3)
            .await
            .unwrap();
        assert_eq!(refunded.token_amount, 10);

        forget_settlement(&store, org.id, ig).await.unwrap();
        assert!(get(&store, org.id).await.unwrap().settlements.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_organization_is_not_found() {
        let store = MemoryStore::new();
        let err = spend(&store, Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }
}
