// Mandelbox assignment.
//
// One assign request per input carrying the whole candidate list; the
// webserver picks the final placement. The response is routed by a fork
// and failures are broken down by status so each gets its own window.

use std::str::FromStr;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use secrecy::SecretString;
use tracing::debug;

use mandelbox_api::{ApiResponse, AssignRequest, AssignResponse, Region};

use crate::flow::{Flow, FlowStream, Fork, Outcome};
use crate::model::{CreateFailure, ErrorWindow, MandelboxAssignment};
use crate::providers::MandelboxProvider;
use crate::token::redact_email;

/// Input of the create flow.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub access_token: SecretString,
    pub user_email: String,
    /// Candidate regions, nearest first.
    pub regions: Vec<Region>,
}

/// Build identification sent with every assign request.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub commit_hash: String,
    pub session_id: i64,
}

/// Scheduler rejection codes that have a dedicated window.
const REJECTION_WINDOWS: [ErrorWindow; 5] = [
    ErrorWindow::CommitHashMismatch,
    ErrorWindow::CouldNotLockInstance,
    ErrorWindow::NoInstanceAvailable,
    ErrorWindow::RegionNotEnabled,
    ErrorWindow::UserAlreadyActive,
];

fn assigned(resp: &ApiResponse<AssignResponse>) -> bool {
    resp.status_in(&[200, 202])
        && resp
            .json
            .as_ref()
            .is_some_and(|body| body.error.is_none() && body.mandelbox_id.is_some())
}

fn classify_failure(resp: &ApiResponse<AssignResponse>) -> CreateFailure {
    match resp.status {
        402 => CreateFailure::NoAccess,
        401 | 422 => CreateFailure::Unauthorized { status: resp.status },
        512 => CreateFailure::Maintenance,
        status => {
            let code = resp.json.as_ref().and_then(|body| body.error.as_deref());
            match code.and_then(|code| ErrorWindow::from_str(code).ok()) {
                Some(window) if REJECTION_WINDOWS.contains(&window) => {
                    CreateFailure::Rejected { window }
                }
                _ => CreateFailure::Internal {
                    status: Some(status),
                    reason: code.unwrap_or("response carries no mandelbox").to_owned(),
                },
            }
        }
    }
}

pub fn create_flow(
    provider: Arc<dyn MandelboxProvider>,
    identity: ClientIdentity,
) -> Flow<CreateRequest, MandelboxAssignment, CreateFailure> {
    let identity = Arc::new(identity);
    Flow::new("mandelboxCreate", move |input| {
        let provider = Arc::clone(&provider);
        let identity = Arc::clone(&identity);
        input
            .flat_map(move |request: CreateRequest| {
                assign(Arc::clone(&provider), Arc::clone(&identity), request)
            })
            .boxed()
    })
}

fn assign(
    provider: Arc<dyn MandelboxProvider>,
    identity: Arc<ClientIdentity>,
    request: CreateRequest,
) -> FlowStream<MandelboxAssignment, CreateFailure> {
    if request.regions.is_empty() {
        return stream::iter([Outcome::Failure(CreateFailure::NoRegions { attempts: 0 })]).boxed();
    }

    let body = AssignRequest {
        regions: request.regions.iter().map(ToString::to_string).collect(),
        client_commit_hash: identity.commit_hash.clone(),
        session_id: identity.session_id,
        user_email: request.user_email.clone(),
    };
    debug!(
        user = %redact_email(&request.user_email),
        regions = ?body.regions,
        "requesting mandelbox"
    );

    stream::once(async move {
        match provider.assign(&request.access_token, &body).await {
            Ok(resp) => route(resp),
            Err(e) if e.is_connectivity() => Outcome::Failure(CreateFailure::Network {
                reason: e.to_string(),
            }),
            Err(e) => Outcome::Failure(CreateFailure::Internal {
                status: None,
                reason: e.to_string(),
            }),
        }
    })
    .boxed()
}

fn route(resp: ApiResponse<AssignResponse>) -> Outcome<MandelboxAssignment, CreateFailure> {
    match Fork::new(assigned).classify(resp) {
        Outcome::Success(ApiResponse {
            json:
                Some(AssignResponse {
                    mandelbox_id: Some(mandelbox_id),
                    ip,
                    ..
                }),
            ..
        }) => Outcome::Success(MandelboxAssignment { mandelbox_id, ip }),
        Outcome::Success(resp) | Outcome::Pending(resp) | Outcome::Failure(resp) => {
            Outcome::Failure(classify_failure(&resp))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::fakes::FakeWebserver;

    fn identity() -> ClientIdentity {
        ClientIdentity {
            commit_hash: "local_dev".into(),
            session_id: 1_700_000_000_000,
        }
    }

    fn request(regions: Vec<Region>) -> CreateRequest {
        CreateRequest {
            access_token: SecretString::from("access".to_string()),
            user_email: "user@example.com".into(),
            regions,
        }
    }

    async fn create(
        responses: Vec<ApiResponse<AssignResponse>>,
    ) -> (Outcome<MandelboxAssignment, CreateFailure>, Arc<FakeWebserver>) {
        let webserver = FakeWebserver::new(responses);
        let outcomes: Vec<_> = create_flow(webserver.clone(), identity())
            .run_once(request(vec![Region::UsEast1, Region::UsWest1]))
            .collect()
            .await;
        assert_eq!(outcomes.len(), 1);
        (outcomes.into_iter().next().unwrap(), webserver)
    }

    fn status_only(status: u16) -> ApiResponse<AssignResponse> {
        ApiResponse::new(status, None)
    }

    #[tokio::test]
    async fn assignment_carries_the_ordered_region_list() {
        let (outcome, webserver) = create(vec![FakeWebserver::assigned("abc", "1.2.3.4")]).await;
        assert_eq!(
            outcome.success(),
            Some(MandelboxAssignment {
                mandelbox_id: "abc".into(),
                ip: Some("1.2.3.4".into()),
            })
        );

        let sent = webserver.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].regions, vec!["us-east-1", "us-west-1"]);
        assert_eq!(sent[0].client_commit_hash, "local_dev");
        assert_eq!(sent[0].user_email, "user@example.com");
    }

    #[tokio::test]
    async fn accepted_status_counts_as_assigned() {
        let mut accepted = FakeWebserver::assigned("abc", "1.2.3.4");
        accepted.status = 202;
        let (outcome, _) = create(vec![accepted]).await;
        assert!(outcome.success().is_some());
    }

    #[tokio::test]
    async fn statuses_map_to_failure_kinds() {
        let cases = [
            (402, CreateFailure::NoAccess),
            (401, CreateFailure::Unauthorized { status: 401 }),
            (422, CreateFailure::Unauthorized { status: 422 }),
            (512, CreateFailure::Maintenance),
        ];
        for (status, expected) in cases {
            let (outcome, _) = create(vec![status_only(status)]).await;
            assert_eq!(outcome.failure(), Some(expected));
        }

        let (outcome, _) = create(vec![status_only(500)]).await;
        assert!(matches!(
            outcome.failure(),
            Some(CreateFailure::Internal {
                status: Some(500),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn an_id_alone_is_enough() {
        let id_only = ApiResponse::new(
            200,
            Some(AssignResponse {
                mandelbox_id: Some("abc".into()),
                ..AssignResponse::default()
            }),
        );
        let (outcome, _) = create(vec![id_only]).await;
        assert_eq!(
            outcome.success(),
            Some(MandelboxAssignment {
                mandelbox_id: "abc".into(),
                ip: None,
            })
        );
    }

    #[tokio::test]
    async fn ok_without_an_id_is_a_failure() {
        let empty = ApiResponse::new(200, Some(AssignResponse::default()));
        let (outcome, _) = create(vec![empty]).await;
        assert!(matches!(
            outcome.failure(),
            Some(CreateFailure::Internal {
                status: Some(200),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn scheduler_codes_pick_their_window() {
        let rejected = ApiResponse::new(
            200,
            Some(AssignResponse {
                error: Some("NO_INSTANCE_AVAILABLE".into()),
                ..AssignResponse::default()
            }),
        );
        let (outcome, _) = create(vec![rejected]).await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.error_window(), ErrorWindow::NoInstanceAvailable);
    }

    #[tokio::test]
    async fn empty_region_list_never_reaches_the_webserver() {
        let webserver = FakeWebserver::new(vec![]);
        let outcomes: Vec<_> = create_flow(webserver.clone(), identity())
            .run_once(request(vec![]))
            .collect()
            .await;
        assert_eq!(
            outcomes,
            vec![Outcome::Failure(CreateFailure::NoRegions { attempts: 0 })]
        );
        assert!(webserver.requests().is_empty());
    }
}
