use carbonver_core::{
    AppContext, OrderBy, OrderDirection, Project, ProjectRepository, SubscribeOptions,
    Verification, VerificationRepository,
};
use std::cell::RefCell;
use std::rc::Rc;

type Deliveries<T> = Rc<RefCell<Vec<Vec<T>>>>;

fn context() -> AppContext {
    AppContext::open_in_memory("cve-platform").unwrap()
}

fn at(timestamp: &str) -> Verification {
    let mut verification = Verification::for_project("P-1");
    verification.timestamp = Some(timestamp.to_string());
    verification
}

fn timestamps(snapshot: &[Verification]) -> Vec<String> {
    snapshot
        .iter()
        .filter_map(|v| v.timestamp.clone())
        .collect()
}

#[test]
fn project_subscription_delivers_current_snapshot_then_every_change() {
    let ctx = context();
    let repo = ctx.projects();
    repo.save_project(Project::new("P-1")).unwrap();

    let seen: Deliveries<String> = Rc::default();
    let sink = Rc::clone(&seen);
    let subscription = repo.subscribe_projects(
        ctx.user_id(),
        Box::new(move |snapshot| {
            sink.borrow_mut()
                .push(snapshot.iter().map(|p| p.project_id.clone()).collect());
        }),
    );

    repo.save_project(Project::new("P-2")).unwrap();
    repo.delete_project("P-1", ctx.user_id());

    assert_eq!(
        *seen.borrow(),
        vec![
            vec!["P-1".to_string()],
            vec!["P-1".to_string(), "P-2".to_string()],
            vec!["P-2".to_string()],
        ]
    );
    subscription.unsubscribe();
}

#[test]
fn deleting_missing_project_does_not_notify() {
    let ctx = context();
    let repo = ctx.projects();
    repo.save_project(Project::new("P-1")).unwrap();

    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let _subscription = repo.subscribe_projects(
        ctx.user_id(),
        Box::new(move |_| *counter.borrow_mut() += 1),
    );
    assert!(repo.delete_project("nope", ctx.user_id()));

    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn unsubscribed_listener_is_never_called_again() {
    let ctx = context();
    let repo = ctx.verifications();

    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let subscription = repo.subscribe_verifications(
        ctx.user_id(),
        SubscribeOptions::default(),
        Box::new(move |_| *counter.borrow_mut() += 1),
    );
    assert_eq!(*calls.borrow(), 1);

    subscription.unsubscribe();
    repo.save_verification(at("2024-01-01")).unwrap();

    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn dropping_subscription_releases_listener() {
    let ctx = context();
    let repo = ctx.verifications();
    let key = ctx.namespace().collection_key(
        carbonver_core::CollectionName::Verifications,
        ctx.user_id(),
    );

    {
        let _subscription = repo.subscribe_verifications(
            ctx.user_id(),
            SubscribeOptions::default(),
            Box::new(|_| {}),
        );
        assert_eq!(ctx.kv().listener_count(&key), 1);
    }

    assert_eq!(ctx.kv().listener_count(&key), 0);
}

#[test]
fn descending_timestamp_order_is_applied_to_every_delivery() {
    let ctx = context();
    let repo = ctx.verifications();
    repo.save_verification(at("2024-01-01")).unwrap();
    repo.save_verification(at("2024-03-01")).unwrap();

    let seen: Deliveries<String> = Rc::default();
    let sink = Rc::clone(&seen);
    let _subscription = repo.subscribe_verifications(
        ctx.user_id(),
        SubscribeOptions::ordered(OrderBy::Timestamp, OrderDirection::Desc),
        Box::new(move |snapshot| sink.borrow_mut().push(timestamps(snapshot))),
    );
    repo.save_verification(at("2024-02-01")).unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], vec!["2024-03-01", "2024-01-01"]);
    assert_eq!(seen[1], vec!["2024-03-01", "2024-02-01", "2024-01-01"]);
}

#[test]
fn unordered_subscription_keeps_insertion_order() {
    let ctx = context();
    let repo = ctx.verifications();
    repo.save_verification(at("2024-03-01")).unwrap();
    repo.save_verification(at("2024-01-01")).unwrap();

    let seen: Deliveries<String> = Rc::default();
    let sink = Rc::clone(&seen);
    let _subscription = repo.subscribe_verifications(
        ctx.user_id(),
        SubscribeOptions::default(),
        Box::new(move |snapshot| sink.borrow_mut().push(timestamps(snapshot))),
    );

    assert_eq!(seen.borrow()[0], vec!["2024-03-01", "2024-01-01"]);
}

#[test]
fn subscribers_are_independent() {
    let ctx = context();
    let repo = ctx.projects();

    let first_calls = Rc::new(RefCell::new(0));
    let second_calls = Rc::new(RefCell::new(0));
    let first_counter = Rc::clone(&first_calls);
    let second_counter = Rc::clone(&second_calls);
    let first = repo.subscribe_projects(
        ctx.user_id(),
        Box::new(move |_| *first_counter.borrow_mut() += 1),
    );
    let _second = repo.subscribe_projects(
        ctx.user_id(),
        Box::new(move |_| *second_counter.borrow_mut() += 1),
    );

    repo.save_project(Project::new("P-1")).unwrap();
    first.unsubscribe();
    repo.save_project(Project::new("P-2")).unwrap();

    assert_eq!(*first_calls.borrow(), 2);
    assert_eq!(*second_calls.borrow(), 3);
}

#[test]
fn subscriptions_outlive_the_repository_handle() {
    let ctx = context();

    let seen: Deliveries<String> = Rc::default();
    let sink = Rc::clone(&seen);
    let _subscription = ctx.projects().subscribe_projects(
        ctx.user_id(),
        Box::new(move |snapshot| {
            sink.borrow_mut()
                .push(snapshot.iter().map(|p| p.project_id.clone()).collect());
        }),
    );

    ctx.projects().save_project(Project::new("P-9")).unwrap();

    assert_eq!(seen.borrow().last(), Some(&vec!["P-9".to_string()]));
}
