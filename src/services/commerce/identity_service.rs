use crate::{
    auth::CurrentIdentity,
    entities::commerce::{account, Account, AccountModel},
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{EmailTemplate, Mailer, TemplateVariables},
    services::commerce::snapshot::CheckoutSnapshot,
};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Emails are compared trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account returned by [`AccountDirectory::create_preconfirmed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedAccount {
    pub account: AccountModel,
    /// `false` when an account with this email already existed
    pub created: bool,
}

/// Identity/account boundary.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountModel>, ServiceError>;

    /// Finds or creates an account whose email is already confirmed.
    async fn create_preconfirmed(&self, email: &str) -> Result<ProvisionedAccount, ServiceError>;
}

/// Account directory backed by the `accounts` table.
#[derive(Clone)]
pub struct DbAccountDirectory {
    db: Arc<DatabaseConnection>,
}

impl DbAccountDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountDirectory for DbAccountDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountModel>, ServiceError> {
        Ok(Account::find()
            .filter(account::Column::Email.eq(normalize_email(email)))
            .one(&*self.db)
            .await?)
    }

    async fn create_preconfirmed(&self, email: &str) -> Result<ProvisionedAccount, ServiceError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(ServiceError::IdentityRequired);
        }

        let row = account::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.clone()),
            email_confirmed: Set(true),
            created_at: Set(Utc::now()),
        };
        // Concurrent provisioning for one email converges on the unique index.
        let inserted = Account::insert(row)
            .on_conflict(
                OnConflict::column(account::Column::Email)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        let account = self.find_by_email(&email).await?.ok_or_else(|| {
            ServiceError::InternalError(format!("Account for {} vanished after insert", email))
        })?;

        Ok(ProvisionedAccount {
            account,
            created: inserted > 0,
        })
    }
}

/// Identity chosen for a confirmed purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identity_id: Uuid,
    pub account_created: bool,
}

/// Decides which identity a confirmed purchase belongs to.
#[derive(Clone)]
pub struct IdentityService {
    directory: Arc<dyn AccountDirectory>,
    mailer: Arc<dyn Mailer>,
    event_sender: Arc<EventSender>,
}

impl IdentityService {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        mailer: Arc<dyn Mailer>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            directory,
            mailer,
            event_sender,
        }
    }

    /// Resolution order: the identity recorded at checkout, then the caller,
    /// then (only with `create_account`) an account for the snapshot email.
    ///
    /// Guest carts are never merged; only entitlements follow the new account.
    #[instrument(skip(self, snapshot, caller))]
    pub async fn resolve(
        &self,
        snapshot: &CheckoutSnapshot,
        caller: Option<&CurrentIdentity>,
        create_account: bool,
    ) -> Result<ResolvedIdentity, ServiceError> {
        if let Some(identity_id) = snapshot.identity_id {
            return Ok(ResolvedIdentity {
                identity_id,
                account_created: false,
            });
        }

        if let Some(caller) = caller {
            return Ok(ResolvedIdentity {
                identity_id: caller.id,
                account_created: false,
            });
        }

        if !create_account {
            return Err(ServiceError::IdentityRequired);
        }

        let provisioned = self
            .directory
            .create_preconfirmed(&snapshot.customer_email)
            .await?;

        if provisioned.created {
            counter!("storefront.accounts.provisioned", 1);
            info!(identity_id = %provisioned.account.id, "Provisioned account for guest purchase");
            self.event_sender
                .send_or_log(Event::AccountProvisioned {
                    identity_id: provisioned.account.id,
                })
                .await;
            self.send_welcome(&provisioned.account).await;
        }

        Ok(ResolvedIdentity {
            identity_id: provisioned.account.id,
            account_created: provisioned.created,
        })
    }

    async fn send_welcome(&self, account: &AccountModel) {
        let mut variables = TemplateVariables::new();
        variables.insert("identity_id".into(), account.id.to_string());
        if let Err(e) = self
            .mailer
            .send(EmailTemplate::AccountProvisioned, &account.email, variables)
            .await
        {
            warn!(identity_id = %account.id, error = %e, "Failed to send account email");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::MemoryMailer;
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use tokio::sync::{mpsc, Mutex};

    #[derive(Default)]
    struct FakeDirectory {
        accounts: Mutex<HashMap<String, AccountModel>>,
    }

    #[async_trait]
    impl AccountDirectory for FakeDirectory {
        async fn find_by_email(&self, email: &str) -> Result<Option<AccountModel>, ServiceError> {
            Ok(self.accounts.lock().await.get(&normalize_email(email)).cloned())
        }

        async fn create_preconfirmed(
            &self,
            email: &str,
        ) -> Result<ProvisionedAccount, ServiceError> {
            let mut accounts = self.accounts.lock().await;
            let email = normalize_email(email);
            if let Some(existing) = accounts.get(&email) {
                return Ok(ProvisionedAccount {
                    account: existing.clone(),
                    created: false,
                });
            }
            let account = AccountModel {
                id: Uuid::new_v4(),
                email: email.clone(),
                email_confirmed: true,
                created_at: Utc::now(),
            };
            accounts.insert(email, account.clone());
            Ok(ProvisionedAccount {
                account,
                created: true,
            })
        }
    }

    fn snapshot(identity_id: Option<Uuid>) -> CheckoutSnapshot {
        CheckoutSnapshot {
            item_ids: vec![Uuid::new_v4()],
            coupon_code: None,
            discount_amount: 0,
            customer_email: "Guest@Example.com".into(),
            identity_id,
            cart_owner: None,
        }
    }

    fn service() -> (IdentityService, Arc<MemoryMailer>) {
        let (tx, _rx) = mpsc::channel(16);
        let mailer = Arc::new(MemoryMailer::default());
        let service = IdentityService::new(
            Arc::new(FakeDirectory::default()),
            mailer.clone(),
            Arc::new(EventSender::new(tx)),
        );
        (service, mailer)
    }

    #[tokio::test]
    async fn snapshot_identity_wins_over_caller() {
        let (service, _) = service();
        let recorded = Uuid::new_v4();
        let caller = CurrentIdentity {
            id: Uuid::new_v4(),
            email: None,
            roles: vec![],
        };
        let resolved = service
            .resolve(&snapshot(Some(recorded)), Some(&caller), true)
            .await
            .unwrap();
        assert_eq!(resolved.identity_id, recorded);
        assert!(!resolved.account_created);
    }

    #[tokio::test]
    async fn guest_without_create_account_is_rejected() {
        let (service, _) = service();
        assert_matches!(
            service.resolve(&snapshot(None), None, false).await,
            Err(ServiceError::IdentityRequired)
        );
    }

    #[tokio::test]
    async fn account_is_only_reported_created_once() {
        let (service, mailer) = service();
        let first = service.resolve(&snapshot(None), None, true).await.unwrap();
        let second = service.resolve(&snapshot(None), None, true).await.unwrap();
        assert!(first.account_created);
        assert!(!second.account_created);
        assert_eq!(first.identity_id, second.identity_id);

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "guest@example.com");
    }
}
