use bytes::Bytes;
use serde_json::json;

use fitcha_net::Query;
use fitcha_shared::constants::{AVATAR_BUCKET, RPC_SEARCH_COURTS, RPC_SEARCH_PLAYERS, TABLE_COURTS};
use fitcha_shared::social::{Court, CourtSearchFilters, PlayerSearchFilters, PlayerSearchResult};
use fitcha_shared::types::CourtId;

use super::{decode, decode_rows, Gateway, RemoteResult};

impl Gateway {
    pub async fn search_players(
        &self,
        filters: &PlayerSearchFilters,
    ) -> RemoteResult<Vec<PlayerSearchResult>> {
        self.guard("Failed to search players", async {
            let params = json!({
                "p_sport": non_empty(&filters.sport),
                "p_level": non_empty(&filters.level),
                "p_location": non_empty(&filters.location),
            });
            decode_rows(self.backend.rpc(RPC_SEARCH_PLAYERS, params).await?)
        })
        .await
    }

    pub async fn search_courts(&self, filters: &CourtSearchFilters) -> RemoteResult<Vec<Court>> {
        self.guard("Failed to search courts", async {
            let params = json!({
                "p_sport_type": non_empty(&filters.sport_type),
                "p_court_type": non_empty(&filters.court_type),
                "p_location": non_empty(&filters.location),
                "p_min_price": filters.min_price.filter(|p| *p > 0.0),
                "p_max_price": filters.max_price.filter(|p| *p > 0.0),
                "p_date": non_empty(&filters.date),
            });
            decode_rows(self.backend.rpc(RPC_SEARCH_COURTS, params).await?)
        })
        .await
    }

    pub async fn court(&self, court_id: CourtId) -> RemoteResult<Court> {
        self.guard("Failed to fetch court details", async {
            let query = Query::table(TABLE_COURTS).eq("id", court_id);
            decode(self.backend.select_one(&query).await?)
        })
        .await
    }

    /// Store the viewer's avatar and return its public URL.
    pub async fn upload_avatar(
        &self,
        extension: &str,
        data: Bytes,
        content_type: &str,
    ) -> RemoteResult<String> {
        let me = self.me()?;
        self.guard("Failed to upload avatar", async {
            let path = format!("{}/avatar.{}", me.id, extension.trim_start_matches('.'));
            self.backend
                .upload(AVATAR_BUCKET, &path, data, content_type)
                .await
        })
        .await
    }
}

/// Blank filter values are sent as null.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fitcha_shared::types::{Identity, UserId};

    use super::*;
    use crate::identity::IdentityProvider;
    use crate::testing::{MockBackend, Op};

    fn gateway(backend: &Arc<MockBackend>) -> (Gateway, UserId) {
        let id = UserId::new();
        let identity = Identity {
            id,
            first_name: "Ana".into(),
            last_name: "Lopez".into(),
            avatar_url: None,
        };
        (Gateway::new(backend.clone(), IdentityProvider::signed_in(identity)), id)
    }

    #[tokio::test]
    async fn test_blank_filters_become_null() {
        let backend = Arc::new(MockBackend::new());
        let (gateway, _) = gateway(&backend);
        let filters = PlayerSearchFilters {
            sport: Some("Tennis".into()),
            level: Some("  ".into()),
            location: None,
        };

        gateway.search_players(&filters).await.unwrap();
        let call = &backend.calls_to(Op::Rpc, RPC_SEARCH_PLAYERS)[0];
        assert_eq!(
            call.body,
            json!({ "p_sport": "Tennis", "p_level": null, "p_location": null })
        );
    }

    #[tokio::test]
    async fn test_avatar_path_is_per_user() {
        let backend = Arc::new(MockBackend::new());
        let (gateway, id) = gateway(&backend);

        let url = gateway
            .upload_avatar(".png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        assert_eq!(url, format!("https://storage.test/avatars/{id}/avatar.png"));
    }

    #[tokio::test]
    async fn test_missing_court_reports_fallback() {
        let backend = Arc::new(MockBackend::new());
        let (gateway, _) = gateway(&backend);
        let err = gateway.court(CourtId::new()).await.unwrap_err();
        assert_eq!(err.message, "Failed to fetch court details");
    }
}
