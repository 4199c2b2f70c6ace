//! End-to-end session behaviour against the in-process mock server.

use proptest::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tourist_client::mock::{MockHandle, MockServer};
use tourist_client::protocol::Method;
use tourist_client::{ClientError, ClientOptions, TouristClient};
use tourist_core::{LocateMode, Location, ServerErrorCode, StopId, TourId};
use tourist_session::{NavigationState, Session, SessionError, SessionEvent};

struct Fixture {
    client: Arc<TouristClient>,
    server: MockHandle,
    repo: TempDir,
}

impl Fixture {
    async fn new() -> Self {
        let (transport, server) = MockServer::start();
        let client = TouristClient::new(ClientOptions::default());
        client.attach(transport).await.unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("file.py"), "print('hi')\n").unwrap();
        Self {
            client: Arc::new(client),
            server,
            repo,
        }
    }

    fn session(&self) -> Session {
        Session::new(Arc::clone(&self.client))
    }

    fn file(&self) -> PathBuf {
        self.repo.path().join("file.py")
    }

    async fn mapped_session(&self) -> Session {
        let session = self.session();
        session
            .map_repository("repo", self.repo.path())
            .await
            .unwrap();
        session
    }
}

fn ids(stops: &[(StopId, String)]) -> Vec<StopId> {
    stops.iter().map(|(id, _)| id.clone()).collect()
}

#[tokio::test]
async fn test_two_stop_tour_walkthrough() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;

    session.new_tour("T1", None).await.unwrap();
    let a = session.add_stop("A", &fx.file(), 10).await.unwrap();
    let b = session.add_stop("B", &fx.file(), 20).await.unwrap();

    let view = session.view_active_tour().await.unwrap();
    assert_eq!(
        view.stops,
        vec![(a.clone(), "A".to_string()), (b.clone(), "B".to_string())]
    );

    let visit = session.goto_stop(&a).await.unwrap();
    assert_eq!(visit.title, "A");
    assert_eq!(visit.location, Some(Location::new(fx.file(), 10)));

    let visit = session.next().await.unwrap().unwrap();
    assert_eq!(visit.stop, b);
    assert_eq!(session.active_stop(), Some(b.clone()));

    assert_eq!(session.next().await.unwrap(), None);
    assert_eq!(session.active_stop(), Some(b));

    let visit = session.prev().await.unwrap().unwrap();
    assert_eq!(visit.stop, a);
    assert_eq!(session.prev().await.unwrap(), None);
}

#[tokio::test]
async fn test_step_without_tour_or_stop_is_none() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    fx.server.clear_log();

    assert_eq!(session.next().await.unwrap(), None);
    assert_eq!(session.prev().await.unwrap(), None);
    assert_eq!(fx.server.requests_seen(), 0);

    session.new_tour("T1", None).await.unwrap();
    session.add_stop("A", &fx.file(), 1).await.unwrap();
    fx.server.clear_log();
    assert_eq!(session.next().await.unwrap(), None);
    assert_eq!(fx.server.requests_seen(), 0);
}

#[tokio::test]
async fn test_created_stop_is_listed_once() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    session.new_tour("T1", None).await.unwrap();

    for line in 1..=5 {
        let stop = session
            .add_stop(&format!("S{line}"), &fx.file(), line)
            .await
            .unwrap();
        let view = session.view_active_tour().await.unwrap();
        assert_eq!(view.stop_ids().filter(|id| **id == stop).count(), 1);
    }
}

#[tokio::test]
async fn test_removed_stop_is_gone_and_cleared() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    session.new_tour("T1", None).await.unwrap();
    let a = session.add_stop("A", &fx.file(), 1).await.unwrap();
    let b = session.add_stop("B", &fx.file(), 2).await.unwrap();
    session.goto_stop(&b).await.unwrap();

    session.remove_stop(&b).await.unwrap();

    let view = session.view_active_tour().await.unwrap();
    assert!(!view.contains_stop(&b));
    assert_eq!(ids(&view.stops), vec![a]);
    assert_eq!(session.active_stop(), None);
    assert!(session.active_tour().is_some());
}

#[tokio::test]
async fn test_stop_removed_by_other_session_is_tolerated() {
    let fx = Fixture::new().await;
    let mine = fx.mapped_session().await;
    let theirs = fx.session();

    let tour = mine.new_tour("T1", None).await.unwrap();
    let a = mine.add_stop("A", &fx.file(), 1).await.unwrap();
    mine.add_stop("B", &fx.file(), 2).await.unwrap();
    mine.goto_stop(&a).await.unwrap();

    theirs.start_tour(tour);
    theirs.remove_stop(&a).await.unwrap();

    // `mine` still thinks A is active; the fresh list no longer has it.
    assert_eq!(mine.active_stop(), Some(a.clone()));
    assert_eq!(mine.next().await.unwrap(), None);
    assert_eq!(mine.prev().await.unwrap(), None);

    mine.resync().await.unwrap();
    assert_eq!(mine.active_stop(), None);
}

#[tokio::test]
async fn test_sessions_share_client_but_not_navigation() {
    let fx = Fixture::new().await;
    let first = fx.mapped_session().await;
    let second = fx.session();

    let t1 = first.new_tour("T1", None).await.unwrap();
    let t2 = second.new_tour("T2", None).await.unwrap();

    assert_eq!(first.active_tour(), Some(t1));
    assert_eq!(second.active_tour(), Some(t2));
    assert_eq!(first.list_tours().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_every_mutation_is_followed_by_one_view() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    session.new_tour("T1", None).await.unwrap();
    let a = session.add_stop("A", &fx.file(), 1).await.unwrap();
    let other = session.client().create_tour("Other").await.unwrap();

    let mutations: Vec<(&str, _)> = vec![
        ("edit_tour_metadata", session.rename_tour("Renamed").await),
        ("edit_tour_metadata", session.edit_tour_description("desc").await),
        ("set_tour_edit", session.set_edit(false).await),
        ("move_stop", session.move_stop(&a, &fx.file(), 3).await),
        ("reorder_stop", session.move_stop_down(&a).await),
        ("edit_stop_metadata", session.edit_stop_title(&a, "A2").await),
        ("link_stop", session.link_stop(&a, &other, None).await),
        ("unlink_stop", session.unlink_stop(&a, &other, None).await),
        ("refresh_tour", session.refresh_tour(None).await),
        ("index_repository", session.unmap_repository("unused").await),
    ];
    // Each call above ran before the next one started, so the log is in order.
    let seen = fx.server.methods_seen();
    let tail = &seen[seen.len() - mutations.len() * 2..];
    for ((method, result), pair) in mutations.into_iter().zip(tail.chunks(2)) {
        result.unwrap();
        assert!(Method::from_name(method).is_some_and(Method::is_mutating));
        assert_eq!(pair, [method, Method::ViewTour.as_str()]);
    }

    let view = session.view_stop(&session.active_tour().unwrap(), &a).await.unwrap();
    assert_eq!(view.title, "A2");
    assert!(view.children.is_empty());
}

#[tokio::test]
async fn test_observers_see_refresh_after_each_mutation() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    session.subscribe(move |event| sink.lock().push(event.clone()));

    let tour = session.new_tour("T1", None).await.unwrap();
    session.add_stop("A", &fx.file(), 1).await.unwrap();

    let refreshed = events
        .lock()
        .iter()
        .filter(|e| matches!(e, SessionEvent::Refreshed { tour: Some(t) } if *t == tour))
        .count();
    assert_eq!(refreshed, 2);
}

#[tokio::test]
async fn test_unmapped_repository_then_mapping_fixes_it() {
    let fx = Fixture::new().await;
    let session = fx.session();
    session.new_tour("T1", None).await.unwrap();

    let err = session.add_stop("A", &fx.file(), 1).await.unwrap_err();
    assert!(err.needs_repository_mapping());
    assert!(!err.is_fatal());

    session
        .map_repository("repo", fx.repo.path())
        .await
        .unwrap();
    let stop = session.add_stop("A", &fx.file(), 1).await.unwrap();
    assert_eq!(session.view_active_tour().await.unwrap().stops.len(), 1);

    let view = session
        .view_stop(&session.active_tour().unwrap(), &stop)
        .await
        .unwrap();
    assert_eq!(view.repository, "repo");
}

#[tokio::test]
async fn test_deleted_repository_makes_stop_broken() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    let tour = session.new_tour("T1", None).await.unwrap();
    let a = session.add_stop("A", &fx.file(), 4).await.unwrap();

    let Fixture { repo, .. } = fx;
    let file = repo.path().join("file.py");
    repo.close().unwrap();

    let located = session
        .locate_stop(&tour, &a, LocateMode::Naive)
        .await
        .unwrap();
    assert_eq!(located, None);

    let broken = session.broken_stops().await.unwrap();
    assert_eq!(ids(&broken), vec![a.clone()]);

    let visit = session.goto_stop(&a).await.unwrap();
    assert_eq!(visit.location, None);
    assert!(session.breakpoints().await.unwrap().is_empty());
    assert!(session.stop_markers(&file).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_markers_use_recorded_lines() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    session.new_tour("T1", None).await.unwrap();
    let a = session.add_stop("A", &fx.file(), 10).await.unwrap();
    std::fs::write(fx.repo.path().join("other.py"), "").unwrap();
    session
        .add_stop("B", &fx.repo.path().join("other.py"), 1)
        .await
        .unwrap();
    fx.server.shift_lines(fx.file(), 5);

    let markers = session.stop_markers(&fx.file()).await.unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].stop, a);
    assert_eq!(markers[0].location, Location::new(fx.file(), 10));
    assert_eq!(session.breakpoints().await.unwrap().len(), 2);

    let visit = session.goto_stop(&a).await.unwrap();
    assert_eq!(visit.location, Some(Location::new(fx.file(), 15)));
}

#[tokio::test]
async fn test_save_open_and_delete() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intro.tour");

    let tour = session.new_tour("Intro", Some(path.clone())).await.unwrap();
    let a = session.add_stop("A", &fx.file(), 1).await.unwrap();
    session.add_stop("B", &fx.file(), 2).await.unwrap();

    let unsaved = session.client().create_tour("Scratch").await.unwrap();
    let err = session.save_all().await.unwrap_err();
    assert_eq!(err.server_code(), Some(ServerErrorCode::NoPathForTour));
    session.forget_tour(&unsaved).await.unwrap();
    assert_eq!(session.active_tour(), Some(tour.clone()));

    session.save(None).await.unwrap();
    assert!(path.is_file());
    session.save_all().await.unwrap();

    let reopened = fx.session();
    let copy = reopened.open_tour(&path, false).await.unwrap();
    assert_ne!(copy, tour);
    assert_eq!(reopened.active_tour(), Some(copy.clone()));
    let view = reopened.view_active_tour().await.unwrap();
    assert_eq!(view.title, "Intro");
    assert!(!view.edit);
    assert_eq!(reopened.active_stop(), view.first_stop().cloned());
    assert_ne!(reopened.active_stop(), Some(a));

    reopened.delete_tour(&copy).await.unwrap();
    assert!(!path.exists());
    assert_eq!(reopened.navigation(), NavigationState::NoTour);
    assert_eq!(session.active_tour(), Some(tour));
}

#[tokio::test]
async fn test_open_errors_are_reported() {
    let fx = Fixture::new().await;
    let session = fx.session();
    let dir = tempfile::tempdir().unwrap();
    let garbage = dir.path().join("bad.tour");
    std::fs::write(&garbage, "not json").unwrap();

    let err = session.open_tour(&garbage, true).await.unwrap_err();
    assert_eq!(err.server_code(), Some(ServerErrorCode::InvalidJson));
    assert_eq!(session.navigation(), NavigationState::NoTour);

    let err = session
        .open_tour(Path::new("/definitely/not/here.tour"), true)
        .await
        .unwrap_err();
    assert_eq!(err.server_code(), Some(ServerErrorCode::IoError));
}

#[tokio::test]
async fn test_dead_server_is_terminal() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    session.new_tour("T1", None).await.unwrap();
    fx.server.close_next();

    let err = session.rename_tour("x").await.unwrap_err();
    assert!(err.is_fatal());
    let err = session.view_active_tour().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Client(ClientError::TransportClosed(_))
    ));
}

fn record(session: &Session) -> Arc<parking_lot::Mutex<Vec<SessionEvent>>> {
    let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    session.subscribe(move |event| sink.lock().push(event.clone()));
    events
}

#[tokio::test]
async fn test_server_lost_during_navigation_closes_session() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    session.new_tour("T1", None).await.unwrap();
    let a = session.add_stop("A", &fx.file(), 1).await.unwrap();
    let events = record(&session);
    fx.server.close_next();

    let err = session.goto_stop(&a).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(*events.lock(), vec![SessionEvent::Closed]);
}

#[tokio::test]
async fn test_server_lost_while_stepping_closes_session() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    session.new_tour("T1", None).await.unwrap();
    let a = session.add_stop("A", &fx.file(), 1).await.unwrap();
    session.add_stop("B", &fx.file(), 2).await.unwrap();
    session.goto_stop(&a).await.unwrap();
    let events = record(&session);
    fx.server.garble_next();

    assert!(session.next().await.unwrap_err().is_fatal());
    assert_eq!(*events.lock(), vec![SessionEvent::Closed]);
    assert_eq!(session.active_stop(), Some(a));
}

#[tokio::test]
async fn test_mismatched_reply_closes_session_for_good() {
    let fx = Fixture::new().await;
    let session = fx.mapped_session().await;
    session.new_tour("T1", None).await.unwrap();
    let events = record(&session);
    fx.server.wrong_id_next();

    let err = session.breakpoints().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Client(ClientError::ProtocolMismatch { .. })
    ));
    assert_eq!(*events.lock(), vec![SessionEvent::Closed]);

    let err = session.list_tours().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Client(ClientError::TransportClosed(_))
    ));
    assert!(!fx.client.is_connected().await);
}

fn reorder_case(len: usize, pos: usize) -> (Vec<StopId>, Vec<StopId>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let fx = Fixture::new().await;
        let session = fx.mapped_session().await;
        session.new_tour("T", None).await.unwrap();
        let mut stops = Vec::new();
        for i in 0..len {
            stops.push(
                session
                    .add_stop(&format!("S{i}"), &fx.file(), i + 1)
                    .await
                    .unwrap(),
            );
        }
        let before = ids(&session.view_active_tour().await.unwrap().stops);
        let stop = &stops[pos];
        session.move_stop_down(stop).await.unwrap();
        session.move_stop_up(stop).await.unwrap();
        let after = ids(&session.view_active_tour().await.unwrap().stops);
        (before, after)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_down_then_up_restores_order(len in 2usize..8, pos in 0usize..8) {
        let pos = pos % len;
        // Moving the last stop down is clamped, so only positions with room qualify.
        prop_assume!(pos + 1 < len);
        let (before, after) = reorder_case(len, pos);
        prop_assert_eq!(before, after);
    }
}

#[test]
fn test_reorder_at_end_is_clamped() {
    let (before, after) = reorder_case(3, 2);
    // Down is a no-op at the end; up then moves it one place.
    assert_eq!(after, vec![before[0].clone(), before[2].clone(), before[1].clone()]);
}

#[tokio::test]
async fn test_tour_ids_come_from_server() {
    let fx = Fixture::new().await;
    let session = fx.session();
    let tour = session.new_tour("T", None).await.unwrap();
    let listed: Vec<TourId> = session
        .list_tours()
        .await
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(listed, vec![tour]);
}
