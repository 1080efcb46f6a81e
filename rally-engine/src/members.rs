use rally_core::member::{normalize_code, Member, MemberError, MemberUpdate};
use rally_core::payment::{CheckoutMode, CheckoutSession, PaymentError, PaymentRail, SessionRequest};
use rally_core::repository::{MemberRepository, RepoError};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Member(#[from] MemberError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

fn storage(e: RepoError) -> RegistryError {
    RegistryError::Storage(e.to_string())
}

/// Member lifecycle: creation with a provider-side customer, code
/// validation, card binding via a setup checkout, partial updates.
pub struct MemberRegistry {
    members: Arc<dyn MemberRepository>,
    rail: Arc<dyn PaymentRail>,
    success_url: String,
    cancel_url: String,
}

impl MemberRegistry {
    pub fn new(
        members: Arc<dyn MemberRepository>,
        rail: Arc<dyn PaymentRail>,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            members,
            rail,
            success_url,
            cancel_url,
        }
    }

    /// Resolve a member code to an active member. Codes match
    /// case-insensitively; inactive members are rejected, not hidden.
    pub async fn validate(&self, code: &str) -> Result<Member, RegistryError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(RegistryError::Validation("member code is required".into()));
        }
        let member = self
            .members
            .find_by_code(&code)
            .await
            .map_err(storage)?
            .ok_or(MemberError::NotFound(code))?;
        if !member.active {
            return Err(MemberError::Inactive(member.member_code).into());
        }
        Ok(member)
    }

    /// Register a member: provider customer first, then the local row,
    /// then a setup checkout to store the card.
    pub async fn create(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<(Member, CheckoutSession), RegistryError> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(RegistryError::Validation("name is required".into()));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(RegistryError::Validation("a valid email is required".into()));
        }

        let customer_id = self.rail.create_customer(name, email, phone).await?;

        let member = Member::new(
            generate_code(),
            name.to_string(),
            email.to_string(),
            phone.map(str::to_string),
            customer_id,
        );
        self.members.insert(&member).await.map_err(storage)?;
        info!("Member {} created with code {}", member.id, member.member_code);

        let session = self.setup_session(&member).await?;
        Ok((member, session))
    }

    /// Open a setup checkout so an existing member can store or replace
    /// their card. Reuses the bound provider customer: the member never
    /// re-enters their identity.
    pub async fn bind_payment_method(&self, code: &str) -> Result<CheckoutSession, RegistryError> {
        let member = self.validate(code).await?;
        self.setup_session(&member).await
    }

    pub async fn update(
        &self,
        member_id: Uuid,
        patch: MemberUpdate,
    ) -> Result<Member, RegistryError> {
        let mut member = self
            .members
            .get(member_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| MemberError::NotFound(member_id.to_string()))?;
        member.apply(patch);
        self.members.update(&member).await.map_err(storage)?;
        Ok(member)
    }

    async fn setup_session(&self, member: &Member) -> Result<CheckoutSession, RegistryError> {
        let session = self
            .rail
            .create_session(&SessionRequest {
                mode: CheckoutMode::Setup,
                amount: None,
                currency: String::new(),
                description: format!("Store payment method for member {}", member.member_code),
                customer_id: Some(member.payment_customer_id.clone()),
                customer_email: Some(member.email.clone()),
                success_url: self.success_url.clone(),
                cancel_url: self.cancel_url.clone(),
                reference: Some(member.id.to_string()),
            })
            .await?;
        Ok(session)
    }
}

/// Short human-typable code, uppercase, collision-unlikely.
fn generate_code() -> String {
    let tail = Uuid::new_v4().simple().to_string();
    format!("M{}", tail[..6].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRail;
    use rally_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        rail: Arc<MockRail>,
        registry: MemberRegistry,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let rail = Arc::new(MockRail::new());
        let registry = MemberRegistry::new(
            store.clone(),
            rail.clone(),
            "http://localhost:8080/card-saved".into(),
            "http://localhost:8080/card-cancelled".into(),
        );
        Fixture {
            store,
            rail,
            registry,
        }
    }

    #[tokio::test]
    async fn create_binds_customer_and_opens_setup_checkout() {
        let f = fixture();
        let (member, session) = f
            .registry
            .create("Ada", "ada@club.example", Some("+49 30 1"))
            .await
            .unwrap();

        assert!(member.member_code.starts_with('M'));
        assert_eq!(member.member_code.len(), 7);
        assert_eq!(member.payment_customer_id, "cus_mock_1");
        assert!(member.active);
        assert!(!session.url.is_empty());

        let sessions = f.rail.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].mode, CheckoutMode::Setup);
        assert_eq!(sessions[0].customer_id.as_deref(), Some("cus_mock_1"));

        let stored = f
            .store
            .find_by_code(&member.member_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, member.id);
    }

    #[tokio::test]
    async fn validate_is_case_insensitive() {
        let f = fixture();
        let (member, _) = f.registry.create("Ada", "ada@club.example", None).await.unwrap();

        let found = f
            .registry
            .validate(&format!("  {} ", member.member_code.to_lowercase()))
            .await
            .unwrap();
        assert_eq!(found.id, member.id);
    }

    #[tokio::test]
    async fn validate_rejects_blank_unknown_and_inactive() {
        let f = fixture();
        assert!(matches!(
            f.registry.validate("   ").await,
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            f.registry.validate("M999999").await,
            Err(RegistryError::Member(MemberError::NotFound(_)))
        ));

        let (member, _) = f.registry.create("Ada", "ada@club.example", None).await.unwrap();
        f.registry
            .update(
                member.id,
                MemberUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            f.registry.validate(&member.member_code).await,
            Err(RegistryError::Member(MemberError::Inactive(_)))
        ));
    }

    #[tokio::test]
    async fn bind_payment_method_reuses_existing_customer() {
        let f = fixture();
        let (member, _) = f.registry.create("Ada", "ada@club.example", None).await.unwrap();

        let session = f
            .registry
            .bind_payment_method(&member.member_code)
            .await
            .unwrap();
        assert!(!session.id.is_empty());

        let sessions = f.rail.sessions.lock().unwrap();
        // One from create, one from the re-bind, same customer both times.
        assert_eq!(sessions.len(), 2);
        assert_eq!(
            sessions[1].customer_id.as_deref(),
            Some(member.payment_customer_id.as_str())
        );
    }

    #[tokio::test]
    async fn update_patches_only_supplied_fields() {
        let f = fixture();
        let (member, _) = f
            .registry
            .create("Ada", "ada@club.example", Some("+49 30 1"))
            .await
            .unwrap();

        let updated = f
            .registry
            .update(
                member.id,
                MemberUpdate {
                    email: Some("new@club.example".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email, "new@club.example");
        assert_eq!(updated.name, "Ada");
        assert_eq!(updated.phone.as_deref(), Some("+49 30 1"));
    }
}
