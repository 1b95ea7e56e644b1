use super::*;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex as StdMutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration};

#[derive(Default)]
struct FakeStore {
    rows: StdMutex<Vec<Workflow>>,
    list_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    update_calls: AtomicUsize,
    fail_with: StdMutex<Option<anyhow::Error>>,
    unauthenticated: AtomicBool,
    delay: Option<Duration>,
}

impl FakeStore {
    fn with_rows(rows: Vec<Workflow>) -> Self {
        Self {
            rows: StdMutex::new(rows),
            ..Self::default()
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn fail_next(&self, message: &str) {
        *self.fail_with.lock().expect("lock") = Some(anyhow!(message.to_string()));
    }

    async fn enter(&self) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unauthenticated.load(Ordering::SeqCst) {
            return Err(ClientError::Unauthenticated.into());
        }
        match self.fail_with.lock().expect("lock").take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WorkflowStore for FakeStore {
    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Workflow>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let mut rows: Vec<Workflow> = self
            .rows
            .lock()
            .expect("lock")
            .iter()
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert(
        &self,
        tenant_id: TenantId,
        title: &str,
        status: WorkflowStatus,
    ) -> Result<Workflow> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let now = Utc::now();
        let workflow = Workflow {
            id: WorkflowId::generate(),
            tenant_id,
            title: title.to_string(),
            status,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().expect("lock").push(workflow.clone());
        Ok(workflow)
    }

    async fn update_status(
        &self,
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Workflow> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        let mut rows = self.rows.lock().expect("lock");
        let row = rows
            .iter_mut()
            .find(|w| w.id == workflow_id)
            .ok_or_else(|| anyhow!("workflow not found"))?;
        row.status = status;
        row.updated_at = updated_at;
        Ok(row.clone())
    }
}

fn workflow(tenant_id: TenantId, title: &str, status: WorkflowStatus, age_minutes: i64) -> Workflow {
    let at = Utc::now() - ChronoDuration::minutes(age_minutes);
    Workflow {
        id: WorkflowId::generate(),
        tenant_id,
        title: title.to_string(),
        status,
        created_at: at,
        updated_at: at,
    }
}

fn seeded(tenant_id: TenantId) -> Vec<Workflow> {
    vec![
        workflow(tenant_id, "older", WorkflowStatus::Erledigt, 30),
        workflow(tenant_id, "newer", WorkflowStatus::InArbeit, 10),
        workflow(tenant_id, "middle", WorkflowStatus::InArbeit, 20),
    ]
}

async fn loaded(store: FakeStore, tenant_id: TenantId) -> WorkflowList<FakeStore> {
    let list = WorkflowList::new(store, Some(tenant_id));
    list.load().await;
    list
}

#[tokio::test]
async fn operations_without_tenant_do_nothing() {
    let tenant_id = TenantId::generate();
    let rows = seeded(tenant_id);
    let list = WorkflowList::new(FakeStore::with_rows(rows.clone()), None);

    list.load().await;
    list.create("Check documents").await;
    list.toggle_status(&rows[0]).await;

    assert_eq!(list.snapshot(), WorkflowListState::default());
    assert_eq!(list.store.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(list.store.insert_calls.load(Ordering::SeqCst), 0);
    assert_eq!(list.store.update_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn load_orders_newest_first_and_clears_loading() {
    let tenant_id = TenantId::generate();
    let mut rows = seeded(tenant_id);
    rows.push(workflow(TenantId::generate(), "foreign", WorkflowStatus::InArbeit, 1));
    let list = loaded(FakeStore::with_rows(rows), tenant_id).await;

    let state = list.snapshot();
    let titles: Vec<_> = state.workflows.iter().map(|w| w.title.as_str()).collect();
    assert_eq!(titles, ["newer", "middle", "older"]);
    assert!(!state.is_loading());
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn load_failure_clears_list_and_records_message() {
    let tenant_id = TenantId::generate();
    let list = loaded(FakeStore::with_rows(seeded(tenant_id)), tenant_id).await;
    assert_eq!(list.snapshot().workflows.len(), 3);

    list.store.fail_next("permission denied for table workflows");
    list.load().await;

    let state = list.snapshot();
    assert!(state.workflows.is_empty());
    assert!(!state.is_loading());
    assert_eq!(
        state.error,
        Some(ListError::Store(
            "permission denied for table workflows".into()
        ))
    );

    list.load().await;
    let state = list.snapshot();
    assert_eq!(state.workflows.len(), 3);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn blank_title_is_rejected_without_remote_call() {
    let tenant_id = TenantId::generate();
    let list = WorkflowList::new(FakeStore::default(), Some(tenant_id));

    list.create("   \t ").await;

    let state = list.snapshot();
    assert_eq!(state.error, Some(ListError::EmptyTitle));
    assert!(!state.creating);
    assert_eq!(list.store.insert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn created_workflow_becomes_first_and_clears_draft() {
    let tenant_id = TenantId::generate();
    let list = loaded(FakeStore::with_rows(seeded(tenant_id)), tenant_id).await;

    list.set_draft_title("  Check documents ");
    list.create_from_draft().await;

    let state = list.snapshot();
    assert_eq!(state.workflows.len(), 4);
    assert_eq!(state.workflows[0].title, "Check documents");
    assert_eq!(state.workflows[0].status, WorkflowStatus::InArbeit);
    assert_eq!(state.workflows[0].tenant_id, tenant_id);
    assert!(state.draft_title.is_empty());
    assert!(!state.creating);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn create_failure_keeps_list_and_draft() {
    let tenant_id = TenantId::generate();
    let list = loaded(FakeStore::with_rows(seeded(tenant_id)), tenant_id).await;
    let before = list.snapshot().workflows;

    list.set_draft_title("Check documents");
    list.store.fail_next("insert rejected");
    list.create_from_draft().await;

    let state = list.snapshot();
    assert_eq!(state.workflows, before);
    assert_eq!(state.draft_title, "Check documents");
    assert!(!state.creating);
    assert_eq!(state.error, Some(ListError::Store("insert rejected".into())));
}

#[tokio::test]
async fn second_create_while_creating_is_ignored() {
    let tenant_id = TenantId::generate();
    let list = WorkflowList::new(
        FakeStore::default().delayed(Duration::from_millis(50)),
        Some(tenant_id),
    );

    tokio::join!(list.create("first"), list.create("second"));

    let state = list.snapshot();
    assert_eq!(list.store.insert_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.workflows.len(), 1);
    assert_eq!(state.workflows[0].title, "first");
}

#[tokio::test]
async fn toggle_flips_status_in_place() {
    let tenant_id = TenantId::generate();
    let list = loaded(FakeStore::with_rows(seeded(tenant_id)), tenant_id).await;
    let target = list.snapshot().workflows[1].clone();
    assert_eq!(target.status, WorkflowStatus::InArbeit);

    list.toggle_status(&target).await;
    let state = list.snapshot();
    assert_eq!(state.workflows[1].id, target.id);
    assert_eq!(state.workflows[1].status, WorkflowStatus::Erledigt);
    assert!(state.workflows[1].updated_at >= target.updated_at);
    assert!(!state.is_busy(target.id));

    let done = state.workflows[1].clone();
    list.toggle_status(&done).await;
    let state = list.snapshot();
    assert_eq!(state.workflows[1].id, target.id);
    assert_eq!(state.workflows[1].status, WorkflowStatus::InArbeit);
}

#[tokio::test]
async fn toggling_done_workflow_reopens_it() {
    let tenant_id = TenantId::generate();
    let list = loaded(FakeStore::with_rows(seeded(tenant_id)), tenant_id).await;
    let done = list.snapshot().done()[0].clone();

    list.toggle_status(&done).await;

    let state = list.snapshot();
    let reopened = state
        .workflows
        .iter()
        .find(|w| w.id == done.id)
        .expect("still listed");
    assert_eq!(reopened.status, WorkflowStatus::InArbeit);
    assert!(state.done().is_empty());
}

#[tokio::test]
async fn second_toggle_of_busy_workflow_is_ignored() {
    let tenant_id = TenantId::generate();
    let store = FakeStore::with_rows(seeded(tenant_id)).delayed(Duration::from_millis(50));
    let list = loaded(store, tenant_id).await;
    let target = list.snapshot().workflows[0].clone();

    tokio::join!(list.toggle_status(&target), list.toggle_status(&target));

    assert_eq!(list.store.update_calls.load(Ordering::SeqCst), 1);
    let state = list.snapshot();
    assert_eq!(state.workflows[0].status, WorkflowStatus::Erledigt);
    assert!(state.busy.is_empty());
}

#[tokio::test]
async fn different_workflows_toggle_concurrently() {
    let tenant_id = TenantId::generate();
    let store = FakeStore::with_rows(seeded(tenant_id)).delayed(Duration::from_millis(30));
    let list = Arc::new(loaded(store, tenant_id).await);
    let rows = list.snapshot().workflows;

    let first = {
        let list = Arc::clone(&list);
        let row = rows[0].clone();
        tokio::spawn(async move { list.toggle_status(&row).await })
    };
    let second = {
        let list = Arc::clone(&list);
        let row = rows[1].clone();
        tokio::spawn(async move { list.toggle_status(&row).await })
    };
    first.await.expect("first toggle");
    second.await.expect("second toggle");

    let state = list.snapshot();
    assert_eq!(list.store.update_calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.workflows[0].status, WorkflowStatus::Erledigt);
    assert_eq!(state.workflows[1].status, WorkflowStatus::Erledigt);
    assert!(state.busy.is_empty());
}

#[tokio::test]
async fn toggle_failure_keeps_row_and_clears_busy() {
    let tenant_id = TenantId::generate();
    let list = loaded(FakeStore::with_rows(seeded(tenant_id)), tenant_id).await;
    let before = list.snapshot().workflows;

    list.store.fail_next("update rejected");
    list.toggle_status(&before[0]).await;

    let state = list.snapshot();
    assert_eq!(state.workflows, before);
    assert!(state.busy.is_empty());
    assert_eq!(state.error, Some(ListError::Store("update rejected".into())));
}

#[tokio::test]
async fn toggle_result_for_unlisted_workflow_is_dropped() {
    let tenant_id = TenantId::generate();
    let stray = workflow(tenant_id, "stray", WorkflowStatus::InArbeit, 5);
    let list = WorkflowList::new(FakeStore::with_rows(vec![stray.clone()]), Some(tenant_id));

    list.toggle_status(&stray).await;

    let state = list.snapshot();
    assert_eq!(list.store.update_calls.load(Ordering::SeqCst), 1);
    assert!(state.workflows.is_empty());
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn slow_store_times_out_and_clears_flags() {
    let tenant_id = TenantId::generate();
    let timeout = Duration::from_millis(20);
    let store = FakeStore::with_rows(seeded(tenant_id)).delayed(Duration::from_millis(500));
    let list = WorkflowList::new(store, Some(tenant_id)).with_timeout(timeout);

    list.load().await;
    let state = list.snapshot();
    assert!(!state.is_loading());
    assert_eq!(state.error, Some(ListError::Timeout(timeout)));

    list.create("Check documents").await;
    let state = list.snapshot();
    assert!(!state.creating);
    assert_eq!(state.error, Some(ListError::Timeout(timeout)));

    let row = workflow(tenant_id, "any", WorkflowStatus::InArbeit, 1);
    list.toggle_status(&row).await;
    let state = list.snapshot();
    assert!(!state.is_busy(row.id));
    assert_eq!(state.error, Some(ListError::Timeout(timeout)));
}

#[tokio::test]
async fn expired_session_surfaces_as_unauthenticated() {
    let tenant_id = TenantId::generate();
    let store = FakeStore::with_rows(seeded(tenant_id));
    store.unauthenticated.store(true, Ordering::SeqCst);
    let list = loaded(store, tenant_id).await;

    let state = list.snapshot();
    assert_eq!(state.error, Some(ListError::Unauthenticated));
    assert!(state.workflows.is_empty());
}

#[tokio::test]
async fn in_work_and_done_partition_the_list() {
    let tenant_id = TenantId::generate();
    let list = loaded(FakeStore::with_rows(seeded(tenant_id)), tenant_id).await;
    let state = list.snapshot();

    let in_work = state.in_work();
    let done = state.done();
    assert_eq!(in_work.len() + done.len(), state.workflows.len());
    assert!(in_work.iter().all(|w| w.status == WorkflowStatus::InArbeit));
    assert!(done.iter().all(|w| w.status == WorkflowStatus::Erledigt));
    assert!(in_work.iter().all(|w| !done.iter().any(|d| d.id == w.id)));
    assert_eq!(state.visible_done().len(), 1);

    list.set_show_done(false);
    let state = list.snapshot();
    assert!(state.visible_done().is_empty());
    assert_eq!(state.done().len(), 1);
}

#[tokio::test]
async fn consecutive_creates_stack_newest_first() {
    let tenant_id = TenantId::generate();
    let list = loaded(FakeStore::with_rows(seeded(tenant_id)), tenant_id).await;

    list.create("first").await;
    list.create("second").await;

    let state = list.snapshot();
    let titles: Vec<_> = state.workflows.iter().map(|w| w.title.as_str()).collect();
    assert_eq!(titles, ["second", "first", "newer", "middle", "older"]);
}

#[tokio::test]
async fn explicit_title_leaves_draft_untouched() {
    let tenant_id = TenantId::generate();
    let list = WorkflowList::new(FakeStore::default(), Some(tenant_id));

    list.set_draft_title("half typed");
    list.create("Check documents").await;

    let state = list.snapshot();
    assert_eq!(state.workflows[0].title, "Check documents");
    assert_eq!(state.draft_title, "half typed");
}

#[tokio::test]
async fn draft_edited_during_create_is_kept() {
    let tenant_id = TenantId::generate();
    let list = WorkflowList::new(
        FakeStore::default().delayed(Duration::from_millis(50)),
        Some(tenant_id),
    );
    list.set_draft_title("Check documents");

    tokio::join!(list.create_from_draft(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        list.set_draft_title("Next one");
    });

    let state = list.snapshot();
    assert_eq!(state.workflows[0].title, "Check documents");
    assert_eq!(state.draft_title, "Next one");
}

#[tokio::test]
async fn dropped_load_releases_loading_and_can_retry() {
    let tenant_id = TenantId::generate();
    let store = FakeStore::with_rows(seeded(tenant_id)).delayed(Duration::from_millis(200));
    let list = WorkflowList::new(store, Some(tenant_id));

    let dropped = tokio::time::timeout(Duration::from_millis(20), list.load()).await;
    assert!(dropped.is_err());
    assert!(!list.snapshot().is_loading());

    list.load().await;
    let state = list.snapshot();
    assert_eq!(state.workflows.len(), 3);
    assert!(!state.is_loading());
}

#[tokio::test]
async fn dropped_toggle_releases_busy_marker_and_can_retry() {
    let tenant_id = TenantId::generate();
    let store = FakeStore::with_rows(seeded(tenant_id)).delayed(Duration::from_millis(100));
    let list = loaded(store, tenant_id).await;
    let target = list.snapshot().workflows[0].clone();

    let dropped =
        tokio::time::timeout(Duration::from_millis(20), list.toggle_status(&target)).await;
    assert!(dropped.is_err());
    assert!(!list.snapshot().is_busy(target.id));

    list.toggle_status(&target).await;
    let state = list.snapshot();
    assert_eq!(list.store.update_calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.workflows[0].status, WorkflowStatus::Erledigt);
    assert!(state.busy.is_empty());
}

#[tokio::test]
async fn dropped_create_releases_creating_and_can_retry() {
    let tenant_id = TenantId::generate();
    let store = FakeStore::default().delayed(Duration::from_millis(100));
    let list = WorkflowList::new(store, Some(tenant_id));

    let dropped = tokio::time::timeout(Duration::from_millis(20), list.create("first")).await;
    assert!(dropped.is_err());
    assert!(!list.snapshot().creating);

    list.create("first").await;
    let state = list.snapshot();
    assert_eq!(list.store.insert_calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.workflows.len(), 1);
    assert!(!state.creating);
}

#[tokio::test]
async fn loading_stays_set_while_a_later_load_is_outstanding() {
    let tenant_id = TenantId::generate();
    let store = FakeStore::with_rows(seeded(tenant_id)).delayed(Duration::from_millis(100));
    let list = WorkflowList::new(store, Some(tenant_id));

    let (_, _, loading_after_first) = tokio::join!(
        list.load(),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            list.load().await;
        },
        async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            list.snapshot().is_loading()
        },
    );

    assert!(loading_after_first);
    assert!(!list.snapshot().is_loading());
    assert_eq!(list.store.list_calls.load(Ordering::SeqCst), 2);
}
