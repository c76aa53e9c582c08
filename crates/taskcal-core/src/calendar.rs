use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{ApiError, TaskApi};
use crate::classify::{CalendarEvent, Categorized, TaskCategory, categorize, find_event_task, project_events};
use crate::form::{FormError, TaskForm};
use crate::session::{Route, Session, UserProfile};
use crate::task::{Status, Task, TaskDraft, normalize_assignee};

pub const LOAD_FAILED: &str = "Failed to load tasks. Please try again.";
pub const SAVE_FAILED: &str = "Failed to save task. Please try again.";
pub const DELETE_FAILED: &str = "Failed to delete task. Please try again.";
pub const COMPLETE_FAILED: &str = "Failed to complete task. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Loading,
    Error(String),
    Ready,
}

/// Shared liveness flag. Once torn down, responses that resolve afterwards
/// are dropped instead of being applied to the view.
#[derive(Debug, Clone, Default)]
pub struct ViewLifecycle {
    torn_down: Arc<AtomicBool>,
}

impl ViewLifecycle {
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        !self.torn_down.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("not signed in")]
    SignedOut,

    #[error("no task with id {0}")]
    UnknownTask(u64),

    #[error("no task form is open")]
    NoOpenForm,

    #[error("view was torn down before the response arrived")]
    TornDown,

    #[error(transparent)]
    Form(#[from] FormError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Task calendar screen: owns the cached task list and UI state, and turns
/// user actions into backend calls followed by a full reload.
#[derive(Debug)]
pub struct CalendarView<A> {
    api: A,
    session: Session,
    viewer_tz: Tz,
    user: Option<UserProfile>,
    tasks: Vec<Task>,
    state: ViewState,
    category: TaskCategory,
    selected: Option<Task>,
    form: Option<TaskForm>,
    lifecycle: ViewLifecycle,
    mounted: bool,
}

impl<A: TaskApi> CalendarView<A> {
    pub fn new(api: A, session: Session, viewer_tz: Tz) -> Self {
        Self {
            api,
            session,
            viewer_tz,
            user: None,
            tasks: Vec::new(),
            state: ViewState::Loading,
            category: TaskCategory::default(),
            selected: None,
            form: None,
            lifecycle: ViewLifecycle::default(),
            mounted: false,
        }
    }

    pub fn lifecycle(&self) -> ViewLifecycle {
        self.lifecycle.clone()
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn category(&self) -> TaskCategory {
        self.category
    }

    /// First-mount hook. Without a signed-in user no list request is made.
    #[instrument(skip(self))]
    pub async fn mount(&mut self) {
        if self.mounted {
            debug!("view already mounted");
            return;
        }
        self.mounted = true;
        self.user = self.session.get_user();

        if let Some(email) = self.user.as_ref().map(|user| user.email.clone()) {
            info!(email = %email, "mounting calendar view");
            self.reload().await;
        } else {
            info!("no session; skipping task load");
            self.state = ViewState::Ready;
        }
    }

    /// Replaces the cached list with the backend's. On failure the previous
    /// list stays in memory and the view shows the load error. Returns
    /// whether the view ended up ready.
    #[instrument(skip(self))]
    pub async fn reload(&mut self) -> bool {
        self.state = ViewState::Loading;
        let result = self.api.list().await;

        if !self.lifecycle.is_active() {
            debug!("dropping task list that resolved after teardown");
            return false;
        }

        match result {
            Ok(response) => {
                debug!(count = response.data.len(), "task list loaded");
                self.tasks = response.data;
                self.state = ViewState::Ready;
                true
            }
            Err(err) => {
                error!(error = %err, "failed to load tasks");
                self.state = ViewState::Error(LOAD_FAILED.to_string());
                false
            }
        }
    }

    pub async fn retry(&mut self) -> bool {
        self.reload().await
    }

    /// Creates or updates (when `draft.id` is set) a task on behalf of the
    /// signed-in user.
    #[instrument(skip(self, draft), fields(id = ?draft.id))]
    pub async fn save_task(&mut self, mut draft: TaskDraft) -> Result<(), ViewError> {
        self.ensure_signed_in()?;
        draft.user_email = self.session.get_user().map(|user| user.email);
        draft.assigned_to_email = normalize_assignee(draft.assigned_to_email.as_deref());

        self.state = ViewState::Loading;
        let result = match draft.id {
            Some(id) => self.api.update(id, &draft).await.map(|_| ()),
            None => self.api.create(&draft).await.map(|_| ()),
        };
        self.finish_mutation("save", SAVE_FAILED, result).await
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&mut self, id: u64) -> Result<(), ViewError> {
        self.ensure_signed_in()?;
        self.state = ViewState::Loading;
        let result = self.api.delete(id).await.map(|_| ());
        self.finish_mutation("delete", DELETE_FAILED, result).await
    }

    /// Marks a task completed by sending the whole task back with the new
    /// status.
    #[instrument(skip(self))]
    pub async fn complete_task(&mut self, id: u64) -> Result<(), ViewError> {
        self.ensure_signed_in()?;
        let draft = self
            .tasks
            .iter()
            .find(|task| task.id == id)
            .map(|task| task.to_draft().with_status(Status::Completed))
            .ok_or(ViewError::UnknownTask(id))?;

        self.state = ViewState::Loading;
        let result = self.api.update(id, &draft).await.map(|_| ());
        self.finish_mutation("complete", COMPLETE_FAILED, result).await
    }

    async fn finish_mutation(
        &mut self,
        op: &'static str,
        failure: &'static str,
        result: Result<(), ApiError>,
    ) -> Result<(), ViewError> {
        if !self.lifecycle.is_active() {
            debug!(op, "dropping mutation result that resolved after teardown");
            return Err(ViewError::TornDown);
        }

        match result {
            Ok(()) => {
                info!(op, "task mutation accepted; reloading");
                self.reload().await;
                Ok(())
            }
            Err(err) => {
                error!(op, error = %err, "task mutation failed");
                self.state = ViewState::Error(failure.to_string());
                Err(err.into())
            }
        }
    }

    fn ensure_signed_in(&self) -> Result<(), ViewError> {
        if self.user.is_some() {
            Ok(())
        } else {
            warn!("task action attempted without a session");
            Err(ViewError::SignedOut)
        }
    }

    pub fn select_category(&mut self, category: TaskCategory) {
        debug!(category = category.as_key(), "category selected");
        self.category = category;
    }

    pub fn categorized(&self, now: DateTime<Utc>) -> Categorized<'_> {
        categorize(&self.tasks, now)
    }

    /// Tasks of the selected category, classified against `now`.
    pub fn visible_tasks(&self, now: DateTime<Utc>) -> Vec<&Task> {
        self.categorized(now).get(self.category).to_vec()
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        project_events(&self.tasks)
    }

    /// Calendar click: opens the detail view for the event's task, if it is
    /// still in the list.
    pub fn click_event(&mut self, event_id: &str) -> Option<&Task> {
        match find_event_task(&self.tasks, event_id) {
            Some(task) => {
                self.selected = Some(task.clone());
                self.selected.as_ref()
            }
            None => {
                debug!(event_id, "clicked event has no matching task");
                None
            }
        }
    }

    /// The task shown in the detail view. After a reload this may be a
    /// snapshot of a task that changed or no longer exists.
    pub fn selected_task(&self) -> Option<&Task> {
        self.selected.as_ref()
    }

    pub fn is_selection_stale(&self) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|selected| !self.tasks.iter().any(|task| task == selected))
    }

    pub fn close_detail(&mut self) {
        self.selected = None;
    }

    pub fn open_create_form(&mut self) -> Result<&mut TaskForm, ViewError> {
        self.ensure_signed_in()?;
        Ok(self.form.insert(TaskForm::create(self.viewer_tz)))
    }

    pub fn open_edit_form(&mut self, id: u64) -> Result<&mut TaskForm, ViewError> {
        self.ensure_signed_in()?;
        let form = self
            .tasks
            .iter()
            .find(|task| task.id == id)
            .map(|task| TaskForm::edit(task, self.viewer_tz))
            .ok_or(ViewError::UnknownTask(id))?;
        Ok(self.form.insert(form))
    }

    pub fn form(&self) -> Option<&TaskForm> {
        self.form.as_ref()
    }

    pub fn form_mut(&mut self) -> Option<&mut TaskForm> {
        self.form.as_mut()
    }

    pub fn close_form(&mut self) {
        self.form = None;
    }

    /// Saves the open form. The form closes only when the save succeeds;
    /// on failure it stays open with the entered values.
    #[instrument(skip(self))]
    pub async fn submit_form(&mut self) -> Result<(), ViewError> {
        let draft = self.form.as_ref().ok_or(ViewError::NoOpenForm)?.payload()?;
        self.save_task(draft).await?;
        if let Some(form) = self.form.as_mut() {
            form.close();
        }
        self.form = None;
        Ok(())
    }

    /// Ends the session and tears the view down.
    #[instrument(skip(self))]
    pub fn logout(&mut self) -> anyhow::Result<Option<Route>> {
        let route = self.session.logout()?;
        self.user = None;
        self.form = None;
        self.selected = None;
        self.lifecycle.teardown();
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::api::{ApiResponse, DeleteAck};
    use crate::session::MemorySessionStore;
    use crate::task::Priority;

    #[derive(Default)]
    struct FakeApi {
        tasks: Mutex<Vec<Task>>,
        calls: Mutex<Vec<String>>,
        drafts: Mutex<Vec<TaskDraft>>,
        fail_list: AtomicBool,
        fail_mutations_with: Mutex<Option<u16>>,
        teardown_on_list: Mutex<Option<ViewLifecycle>>,
    }

    impl FakeApi {
        fn with_tasks(tasks: Vec<Task>) -> Self {
            Self {
                tasks: Mutex::new(tasks),
                ..Self::default()
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().expect("calls lock").push(call);
        }

        fn mutation_failure(&self) -> Result<(), ApiError> {
            match *self.fail_mutations_with.lock().expect("fail lock") {
                Some(status) => Err(ApiError::Status {
                    status,
                    status_text: "Not Found".to_string(),
                }),
                None => Ok(()),
            }
        }
    }

    impl TaskApi for &FakeApi {
        async fn list(&self) -> Result<ApiResponse<Vec<Task>>, ApiError> {
            self.record("list".to_string());
            if let Some(lifecycle) = self.teardown_on_list.lock().expect("lock").as_ref() {
                lifecycle.teardown();
            }
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: 500,
                    status_text: "Internal Server Error".to_string(),
                });
            }
            Ok(ApiResponse {
                data: self.tasks.lock().expect("tasks lock").clone(),
            })
        }

        async fn create(&self, draft: &TaskDraft) -> Result<ApiResponse<Task>, ApiError> {
            self.record("create".to_string());
            self.drafts.lock().expect("drafts lock").push(draft.clone());
            self.mutation_failure()?;
            let mut tasks = self.tasks.lock().expect("tasks lock");
            let task = Task {
                id: tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1,
                title: draft.title.clone().unwrap_or_default(),
                description: draft.description.clone().unwrap_or_default(),
                due_date: draft.due_date.clone().unwrap_or_default(),
                status: Status::Pending,
                priority: draft.priority.clone().unwrap_or_default(),
                assigned_to_email: draft.assigned_to_email.clone(),
                user_email: draft.user_email.clone().unwrap_or_default(),
                dependencies: None,
            };
            tasks.push(task.clone());
            Ok(ApiResponse { data: task })
        }

        async fn update(&self, id: u64, draft: &TaskDraft) -> Result<ApiResponse<Task>, ApiError> {
            self.record(format!("update {id}"));
            self.drafts.lock().expect("drafts lock").push(draft.clone());
            self.mutation_failure()?;
            let mut tasks = self.tasks.lock().expect("tasks lock");
            let task = tasks.iter_mut().find(|t| t.id == id).ok_or(ApiError::Status {
                status: 404,
                status_text: "Not Found".to_string(),
            })?;
            if let Some(status) = draft.status {
                task.status = status;
            }
            if let Some(title) = draft.title.clone() {
                task.title = title;
            }
            Ok(ApiResponse { data: task.clone() })
        }

        async fn delete(&self, id: u64) -> Result<ApiResponse<DeleteAck>, ApiError> {
            self.record(format!("delete {id}"));
            self.mutation_failure()?;
            self.tasks.lock().expect("tasks lock").retain(|t| t.id != id);
            Ok(ApiResponse {
                data: DeleteAck {
                    message: "deleted".to_string(),
                },
            })
        }
    }

    fn task(id: u64, due: &str) -> Task {
        Task {
            id,
            title: format!("task {id}"),
            description: String::new(),
            due_date: due.to_string(),
            status: Status::Pending,
            priority: Priority::Medium,
            assigned_to_email: None,
            user_email: "alice@example.com".to_string(),
            dependencies: None,
        }
    }

    fn signed_in() -> Session {
        let mut session = Session::interactive(MemorySessionStore::new());
        session
            .start(
                "tok",
                &UserProfile {
                    name: "Alice".to_string(),
                    email: "alice@example.com".to_string(),
                },
            )
            .expect("start session");
        session
    }

    fn seeded() -> FakeApi {
        FakeApi::with_tasks(vec![
            task(5, "2024-01-01T00:00:00Z"),
            task(6, "2030-01-01T00:00:00Z"),
        ])
    }

    fn calls(api: &FakeApi) -> Vec<String> {
        api.calls.lock().expect("calls lock").clone()
    }

    #[tokio::test]
    async fn mount_without_session_never_lists() {
        let api = seeded();
        let mut view = CalendarView::new(&api, Session::interactive(MemorySessionStore::new()), chrono_tz::UTC);
        view.mount().await;
        assert!(calls(&api).is_empty());
        assert_eq!(view.state(), &ViewState::Ready);
        assert!(view.user().is_none());
        assert!(matches!(view.open_create_form(), Err(ViewError::SignedOut)));
        assert!(matches!(view.delete_task(5).await, Err(ViewError::SignedOut)));
        assert!(calls(&api).is_empty());
    }

    #[tokio::test]
    async fn mount_loads_once_and_filters_by_category() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;
        view.mount().await;
        assert_eq!(calls(&api), vec!["list"]);
        assert_eq!(view.state(), &ViewState::Ready);

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().expect("now");
        let upcoming: Vec<u64> = view.visible_tasks(now).iter().map(|t| t.id).collect();
        assert_eq!(upcoming, vec![6]);
        view.select_category(TaskCategory::Pending);
        let pending: Vec<u64> = view.visible_tasks(now).iter().map(|t| t.id).collect();
        assert_eq!(pending, vec![5]);
        assert_eq!(view.events().len(), 2);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_tasks() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;
        api.fail_list.store(true, Ordering::SeqCst);

        assert!(!view.reload().await);
        assert_eq!(view.state(), &ViewState::Error(LOAD_FAILED.to_string()));
        assert_eq!(view.tasks().len(), 2);

        api.fail_list.store(false, Ordering::SeqCst);
        assert!(view.retry().await);
        assert_eq!(view.state(), &ViewState::Ready);
    }

    #[tokio::test]
    async fn delete_not_found_surfaces_error_and_keeps_task() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;
        *api.fail_mutations_with.lock().expect("lock") = Some(404);

        let err = view.delete_task(5).await.expect_err("404 must fail");
        assert!(matches!(err, ViewError::Api(ref api_err) if api_err.status() == Some(404)));
        assert_eq!(view.state(), &ViewState::Error(DELETE_FAILED.to_string()));
        assert!(view.tasks().iter().any(|t| t.id == 5));
        assert_eq!(calls(&api), vec!["list", "delete 5"]);
    }

    #[tokio::test]
    async fn every_successful_mutation_reloads_exactly_once() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;

        view.delete_task(6).await.expect("delete");
        view.complete_task(5).await.expect("complete");
        assert_eq!(calls(&api), vec!["list", "delete 6", "list", "update 5", "list"]);
        assert_eq!(view.state(), &ViewState::Ready);
        assert_eq!(view.tasks()[0].status, Status::Completed);
    }

    #[tokio::test]
    async fn complete_sends_full_task_with_completed_status() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;
        view.complete_task(5).await.expect("complete");

        let drafts = api.drafts.lock().expect("lock").clone();
        let expected = task(5, "2024-01-01T00:00:00Z").to_draft().with_status(Status::Completed);
        assert_eq!(drafts, vec![expected]);
        assert!(matches!(view.complete_task(99).await, Err(ViewError::UnknownTask(99))));
    }

    #[tokio::test]
    async fn form_submit_attaches_owner_and_closes() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;

        let form = view.open_create_form().expect("form");
        form.title = "Plan sprint".to_string();
        form.due_local = "2031-02-03T09:30".to_string();
        form.assignee = "   ".to_string();
        view.submit_form().await.expect("submit");

        assert!(view.form().is_none());
        assert_eq!(calls(&api), vec!["list", "create", "list"]);
        let draft = api.drafts.lock().expect("lock")[0].clone();
        assert_eq!(draft.user_email.as_deref(), Some("alice@example.com"));
        assert_eq!(draft.assigned_to_email, None);
        assert_eq!(draft.due_date.as_deref(), Some("2031-02-03T09:30:00.000Z"));
        assert_eq!(view.tasks().len(), 3);
    }

    #[tokio::test]
    async fn failed_save_keeps_form_open_with_values() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;
        *api.fail_mutations_with.lock().expect("lock") = Some(500);

        let form = view.open_edit_form(6).expect("edit form");
        form.title = "Renamed".to_string();
        assert!(view.submit_form().await.is_err());

        let form = view.form().expect("form stays open");
        assert!(form.is_open());
        assert_eq!(form.title, "Renamed");
        assert_eq!(view.state(), &ViewState::Error(SAVE_FAILED.to_string()));
        assert_eq!(calls(&api), vec!["list", "update 6"]);
    }

    #[tokio::test]
    async fn selection_goes_stale_without_crashing() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;

        assert_eq!(view.click_event("5").map(|t| t.id), Some(5));
        view.delete_task(5).await.expect("delete");
        assert_eq!(view.selected_task().map(|t| t.id), Some(5));
        assert!(view.is_selection_stale());

        view.close_detail();
        assert!(view.selected_task().is_none());
        assert!(!view.is_selection_stale());
        assert!(view.click_event("5").is_none());
    }

    #[tokio::test]
    async fn responses_after_teardown_are_ignored() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        *api.teardown_on_list.lock().expect("lock") = Some(view.lifecycle());

        view.mount().await;
        assert_eq!(calls(&api), vec!["list"]);
        assert_eq!(view.state(), &ViewState::Loading);
        assert!(view.tasks().is_empty());
    }

    #[tokio::test]
    async fn logout_clears_session_and_routes_to_login() {
        let api = seeded();
        let mut view = CalendarView::new(&api, signed_in(), chrono_tz::UTC);
        view.mount().await;
        assert_eq!(view.logout().expect("logout"), Some(Route::Login));
        assert!(view.user().is_none());
        assert!(!view.lifecycle().is_active());
    }
}
