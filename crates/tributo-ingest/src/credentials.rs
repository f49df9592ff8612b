//! Credential store and lifecycle.
//!
//! Passwords are encrypted with the vault before they touch the store.
//! Verification drives a real portal login: success stamps
//! `last_verified` and resets the failure counter, failure increments it.
//! After three consecutive failures the derived
//! `is_credentials_valid` predicate turns false — `load` still returns the
//! plaintext so diagnostic flows work, and consumers gate on the record's
//! validity.

use chrono::Utc;
use tributo_core::{CompanyId, Rut};
use tributo_portal::{PortalCredentials, PortalError, PortalSession};
use tributo_store::{CredentialRecord, CredentialStore};
use tributo_vault::{Secret, Vault};
use uuid::Uuid;

use crate::error::IngestError;

/// Decrypted credentials plus the backing record, so consumers can check
/// `record.is_credentials_valid()` before spending a portal login on them.
#[derive(Debug)]
pub struct ResolvedCredentials {
    pub tax_id: Rut,
    pub password: Secret,
    pub record: CredentialRecord,
}

impl ResolvedCredentials {
    /// Build the credential pair a portal session is constructed with.
    pub fn portal_credentials(&self) -> PortalCredentials {
        PortalCredentials::new(self.tax_id, self.password.expose().to_string())
    }
}

/// Credential encryption, lookup and verification.
#[derive(Debug, Clone)]
pub struct CredentialService<S> {
    store: S,
    vault: Vault,
}

impl<S: CredentialStore> CredentialService<S> {
    pub fn new(store: S, vault: Vault) -> Self {
        Self { store, vault }
    }

    /// Encrypt and upsert a credential row, marking it active.
    pub async fn store(
        &self,
        company_id: CompanyId,
        user_email: &str,
        tax_id: Rut,
        password: &str,
    ) -> Result<(), IngestError> {
        let encrypted = self.vault.encrypt(password)?;
        let existing = self.store.credentials_for_company(company_id).await?;
        let record = CredentialRecord {
            id: existing.as_ref().map(|c| c.id).unwrap_or_else(Uuid::new_v4),
            company_id,
            user_email: user_email.to_string(),
            tax_id,
            encrypted_password: encrypted,
            is_active: true,
            last_verified: existing.as_ref().and_then(|c| c.last_verified),
            verification_failures: 0,
            created_at: existing
                .as_ref()
                .map(|c| c.created_at)
                .unwrap_or_else(Utc::now),
        };
        self.store.upsert_credentials(&record).await?;
        tracing::info!(company = %tax_id, user = user_email, "portal credentials stored");
        Ok(())
    }

    /// Decrypt the company's credentials.
    ///
    /// Fails with `NoCredentials` when no row exists and
    /// `CredentialsDisabled` when the row has been deactivated. A row past
    /// the failure threshold is still returned — callers consult
    /// `record.is_credentials_valid()`.
    pub async fn load(&self, company_id: CompanyId) -> Result<ResolvedCredentials, IngestError> {
        let record = self
            .store
            .credentials_for_company(company_id)
            .await?
            .ok_or_else(|| IngestError::NoCredentials(company_id.to_string()))?;
        if !record.is_active {
            return Err(IngestError::CredentialsDisabled(record.tax_id.canonical()));
        }
        let password = self.vault.decrypt(&record.encrypted_password)?;
        Ok(ResolvedCredentials {
            tax_id: record.tax_id,
            password,
            record,
        })
    }

    /// Verify the stored credentials against the portal using the given
    /// session (constructed by the caller with `load`'s output). Updates
    /// the verification counters and always closes the session.
    pub async fn verify<P: PortalSession>(
        &self,
        company_id: CompanyId,
        mut session: P,
    ) -> Result<bool, IngestError> {
        let outcome = session.authenticate().await;
        session.close().await;

        match outcome {
            Ok(true) => {
                self.store
                    .record_verification_success(company_id, Utc::now())
                    .await?;
                tracing::info!(company = %company_id, "credential verification succeeded");
                Ok(true)
            }
            Ok(false) | Err(PortalError::Auth { .. }) => {
                let failures = self.store.record_verification_failure(company_id).await?;
                tracing::warn!(
                    company = %company_id,
                    failures,
                    "credential verification failed"
                );
                Ok(false)
            }
            Err(e) => {
                // Transport problems are not credential failures; surface
                // them without touching the counter.
                Err(IngestError::Portal(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributo_portal::MockPortalSession;
    use tributo_store::{CompanyRecord, CompanyStore, MemStore};

    async fn setup() -> (MemStore, CompanyRecord, CredentialService<MemStore>) {
        let store = MemStore::new();
        let company = CompanyRecord::new(Rut::parse("77794858-K").unwrap(), "Empresa SpA");
        store.insert_company(&company).await.unwrap();
        let service = CredentialService::new(store.clone(), Vault::from_master_secret("test"));
        (store, company, service)
    }

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let (_, company, service) = setup().await;
        service
            .store(company.id, "user@example.cl", company.tax_id, "clave123")
            .await
            .unwrap();
        let resolved = service.load(company.id).await.unwrap();
        assert_eq!(resolved.password.expose(), "clave123");
        assert_eq!(resolved.tax_id, company.tax_id);
        assert!(resolved.record.is_credentials_valid());
    }

    #[tokio::test]
    async fn load_without_row_is_no_credentials() {
        let (_, company, service) = setup().await;
        assert!(matches!(
            service.load(company.id).await,
            Err(IngestError::NoCredentials(_))
        ));
    }

    #[tokio::test]
    async fn verify_success_resets_counter() {
        let (store, company, service) = setup().await;
        service
            .store(company.id, "user@example.cl", company.tax_id, "clave123")
            .await
            .unwrap();
        store.record_verification_failure(company.id).await.unwrap();
        store.record_verification_failure(company.id).await.unwrap();

        let ok = service
            .verify(company.id, MockPortalSession::new())
            .await
            .unwrap();
        assert!(ok);
        let record = store
            .credentials_for_company(company.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.verification_failures, 0);
        assert!(record.last_verified.is_some());
    }

    #[tokio::test]
    async fn verify_failure_increments_until_invalid() {
        let (store, company, service) = setup().await;
        service
            .store(company.id, "user@example.cl", company.tax_id, "clave123")
            .await
            .unwrap();

        for _ in 0..3 {
            let ok = service
                .verify(company.id, MockPortalSession::rejecting_auth())
                .await
                .unwrap();
            assert!(!ok);
        }
        let record = store
            .credentials_for_company(company.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.verification_failures, 3);
        assert!(!record.is_credentials_valid());
        // Load still returns the plaintext; the record carries validity.
        let resolved = service.load(company.id).await.unwrap();
        assert!(!resolved.record.is_credentials_valid());
    }
}
