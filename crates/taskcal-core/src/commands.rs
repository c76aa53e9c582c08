use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use anyhow::{Context, anyhow, bail};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::api::{HttpTaskApi, TaskApi};
use crate::auth::{AuthClient, LoginRequest, SignupRequest};
use crate::calendar::{CalendarView, ViewError, ViewState};
use crate::cli::{Command, NewTaskArgs, TaskEditArgs};
use crate::config::Config;
use crate::form::is_valid_email;
use crate::render::Renderer;
use crate::session::{FileSessionStore, Session};

#[instrument(skip_all)]
pub async fn dispatch(
    command: Command,
    cfg: &Config,
    data_dir: &Path,
    renderer: &Renderer,
) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();

    match command {
        Command::Signup {
            name,
            email,
            password,
        } => {
            ensure_email(&email)?;
            let request = SignupRequest {
                name,
                email,
                password: password_or_prompt(password)?,
            };
            let route = AuthClient::new(&cfg.api_url())?
                .signup(&request)
                .await
                .map_err(|err| anyhow!(err.alert_message()))?;
            writeln!(out, "Account created. Log in with `taskcal login` ({}).", route.path())?;
        }
        Command::Login { email, password } => {
            ensure_email(&email)?;
            let request = LoginRequest {
                email,
                password: password_or_prompt(password)?,
            };
            let mut session = open_session(data_dir)?;
            let route = AuthClient::new(&cfg.api_url())?
                .login(&request, &mut session)
                .await
                .map_err(|err| anyhow!(err.alert_message()))?;
            writeln!(out, "Logged in as {} ({}).", request.email, route.path())?;
        }
        Command::Logout => {
            let mut session = open_session(data_dir)?;
            match session.logout()? {
                Some(route) => writeln!(out, "Logged out ({}).", route.path())?,
                None => writeln!(out, "No session to clear.")?,
            }
        }
        Command::Whoami => {
            let session = open_session(data_dir)?;
            renderer.write_user(&mut out, session.get_user().as_ref())?;
        }
        Command::List { category } => {
            let mut view = mounted_view(cfg, data_dir).await?;
            settle(&mut view, renderer).await?;
            view.select_category(category);
            renderer.write_category_panel(&mut out, &view.categorized(Utc::now()), view.category())?;
        }
        Command::Calendar { json } => {
            let mut view = mounted_view(cfg, data_dir).await?;
            settle(&mut view, renderer).await?;
            let events = view.events();
            if json {
                renderer.write_events_json(&mut out, &events)?;
            } else {
                renderer.write_events(&mut out, &events)?;
            }
        }
        Command::Show { id } => {
            let mut view = mounted_view(cfg, data_dir).await?;
            settle(&mut view, renderer).await?;
            if view.click_event(&id).is_none() {
                bail!("no task for calendar event {id}");
            }
            if let Some(task) = view.selected_task() {
                renderer.write_task_detail(&mut out, task, view.is_selection_stale())?;
            }
        }
        Command::Add(args) => {
            let mut view = mounted_view(cfg, data_dir).await?;
            settle(&mut view, renderer).await?;
            fill_new_task(&mut view, args)?;
            let result = view.submit_form().await;
            conclude(&mut view, renderer, result).await?;
            writeln!(out, "Task created.")?;
        }
        Command::Edit { id, fields } => {
            let mut view = mounted_view(cfg, data_dir).await?;
            settle(&mut view, renderer).await?;
            apply_edits(&mut view, id, fields)?;
            let result = view.submit_form().await;
            conclude(&mut view, renderer, result).await?;
            writeln!(out, "Task {id} updated.")?;
        }
        Command::Complete { id } => {
            let mut view = mounted_view(cfg, data_dir).await?;
            settle(&mut view, renderer).await?;
            let result = view.complete_task(id).await;
            conclude(&mut view, renderer, result).await?;
            writeln!(out, "Task {id} completed.")?;
        }
        Command::Delete { id } => {
            let mut view = mounted_view(cfg, data_dir).await?;
            settle(&mut view, renderer).await?;
            let result = view.delete_task(id).await;
            conclude(&mut view, renderer, result).await?;
            writeln!(out, "Task {id} deleted.")?;
        }
    }

    Ok(())
}

fn open_session(data_dir: &Path) -> anyhow::Result<Session> {
    let store = FileSessionStore::open(data_dir)
        .with_context(|| format!("failed to open session store in {}", data_dir.display()))?;
    Ok(Session::interactive(store))
}

async fn mounted_view(cfg: &Config, data_dir: &Path) -> anyhow::Result<CalendarView<HttpTaskApi>> {
    let session = open_session(data_dir)?;
    let api = HttpTaskApi::new(&cfg.api_url(), session.get_token())?;
    let mut view = CalendarView::new(api, session, cfg.viewer_timezone());
    view.mount().await;
    if view.user().is_none() {
        bail!("not logged in; run `taskcal login` first");
    }
    Ok(view)
}

/// Waits out an error state: offers a retry on a terminal, otherwise fails
/// with the displayed message.
async fn settle<A: TaskApi>(view: &mut CalendarView<A>, renderer: &Renderer) -> anyhow::Result<()> {
    loop {
        let ViewState::Error(message) = view.state().clone() else {
            return Ok(());
        };
        renderer.write_state(&mut io::stderr().lock(), view.state())?;
        if !confirm_retry()? {
            return Err(anyhow!(message));
        }
        info!("retrying task load");
        view.retry().await;
    }
}

/// Surfaces the outcome of a task action. Network failures leave the view
/// in its error state, which `settle` turns into a retry prompt. A change
/// that was saved still counts as done when only the reload failed.
async fn conclude<A: TaskApi>(
    view: &mut CalendarView<A>,
    renderer: &Renderer,
    result: Result<(), ViewError>,
) -> anyhow::Result<()> {
    match result {
        Ok(()) => {
            if let Err(err) = settle(view, renderer).await {
                warn!(error = %err, "change saved but task list reload failed");
            }
            Ok(())
        }
        Err(err @ ViewError::Api(_)) => {
            warn!(error = %err, "task action failed");
            let message = match view.state() {
                ViewState::Error(message) => message.clone(),
                _ => err.to_string(),
            };
            if settle(view, renderer).await.is_ok() {
                info!("task list reloaded after failed action");
            }
            Err(anyhow::Error::new(err).context(message))
        }
        Err(err) => Err(err.into()),
    }
}

fn fill_new_task<A: TaskApi>(view: &mut CalendarView<A>, args: NewTaskArgs) -> anyhow::Result<()> {
    let form = view.open_create_form()?;
    form.title = args.title;
    form.description = args.description;
    form.due_local = args.due;
    form.priority = args.priority;
    form.assignee = args.assign.unwrap_or_default();
    debug!(heading = form.heading(), "task form filled");
    Ok(())
}

fn apply_edits<A: TaskApi>(view: &mut CalendarView<A>, id: u64, fields: TaskEditArgs) -> anyhow::Result<()> {
    let form = view.open_edit_form(id)?;
    if let Some(title) = fields.title {
        form.title = title;
    }
    if let Some(description) = fields.description {
        form.description = description;
    }
    if let Some(due) = fields.due {
        form.due_local = due;
    }
    if let Some(priority) = fields.priority {
        form.priority = priority;
    }
    if let Some(assign) = fields.assign {
        form.assignee = assign;
    }
    debug!(heading = form.heading(), id, "task form filled");
    Ok(())
}

fn ensure_email(email: &str) -> anyhow::Result<()> {
    if is_valid_email(email.trim()) {
        Ok(())
    } else {
        Err(anyhow!("'{email}' is not a valid email address"))
    }
}

fn password_or_prompt(password: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Password: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("failed reading password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password is required");
    }
    Ok(password)
}

fn confirm_retry() -> anyhow::Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }
    eprint!("Retry? [y/N] ");
    io::stderr().flush()?;
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
