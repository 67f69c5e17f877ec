use std::{collections::HashSet, time::Duration};

use chrono::Local;
use eframe::{
    App, CreationContext, Frame,
    egui::{self, Context, Layout},
};
use egui_extras::{Column, TableBuilder};
use log::{debug, warn};

use crate::{
    domain::{Account, Activity, Host, RepoRef},
    fetch::{FetchCoordinator, NamedRange, StoreEvent, StoreKind},
    report,
    storage::ConfigStore,
};

pub const APP_NAME: &str = "Standup";

pub struct StandupApp {
    config_store: Option<ConfigStore>,
    storage_warning: Option<String>,
    accounts: Vec<Account>,
    repos: Vec<RepoRef>,
    account_form: AccountForm,
    repo_form: RepoForm,
    coordinator: FetchCoordinator,
    active_range: NamedRange,
    // Activities start selected for the report; this holds the opt-outs,
    // keyed by html_url so selection survives a store reload.
    deselected: HashSet<String>,
    notice: Option<String>,
    error: Option<String>,
    report_html: Option<String>,
}

impl StandupApp {
    pub fn new(_cc: &CreationContext<'_>) -> Self {
        let mut app = Self {
            config_store: None,
            storage_warning: None,
            accounts: Vec::new(),
            repos: Vec::new(),
            account_form: AccountForm::default(),
            repo_form: RepoForm::default(),
            coordinator: FetchCoordinator::new(),
            active_range: NamedRange::Yesterday,
            deselected: HashSet::new(),
            notice: None,
            error: None,
            report_html: None,
        };

        match ConfigStore::initialize() {
            Ok(store) => {
                match store.load_accounts() {
                    Ok(accounts) => app.accounts = accounts,
                    Err(err) => {
                        app.storage_warning =
                            Some(format!("Failed to restore saved accounts: {err}"))
                    }
                }
                match store.load_repositories() {
                    Ok(repos) => app.repos = repos,
                    Err(err) => {
                        app.storage_warning =
                            Some(format!("Failed to restore saved repositories: {err}"))
                    }
                }
                app.config_store = Some(store);
            }
            Err(err) => {
                app.storage_warning = Some(format!(
                    "Settings storage is unavailable; configuration cannot be persisted ({err})."
                ));
            }
        }

        if let Some(account) = app.accounts.iter().find(|a| a.host == Host::Github) {
            app.account_form.username = account.username.clone();
            app.account_form.token = account.token.clone().unwrap_or_default();
        }

        // Initial load for the default range.
        app.coordinator
            .refresh(app.active_range, false, &app.accounts, &app.repos);

        app
    }

    fn consume_store_events(&mut self) {
        for event in self.coordinator.take_events() {
            match event {
                StoreEvent::TitlesMerged { repo, updated } => {
                    debug!(
                        "presentation observed {updated} title updates for {}",
                        repo.long_name()
                    );
                }
                StoreEvent::CycleReady { store } => {
                    debug!("{store:?} store ready");
                    self.error = None;
                }
                StoreEvent::CycleFailed {
                    message,
                    rate_limited,
                } => {
                    if rate_limited {
                        warn!("fetch cycle hit the API rate limit");
                    }
                    self.error = Some(message);
                }
                StoreEvent::RateLimited { message } | StoreEvent::NotConfigured { message } => {
                    self.notice = Some(message);
                }
            }
        }
    }

    fn save_account(&mut self) {
        let username = self.account_form.username.trim();
        if username.is_empty() {
            self.account_form.form_error = Some("A GitHub username is required.".to_owned());
            return;
        }
        let token = self.account_form.token.trim();
        let account = Account {
            host: Host::Github,
            username: username.to_owned(),
            token: (!token.is_empty()).then(|| token.to_owned()),
        };

        // One account per host.
        match self.accounts.iter_mut().find(|a| a.host == account.host) {
            Some(existing) => *existing = account,
            None => self.accounts.push(account),
        }

        let Some(store) = &self.config_store else {
            self.account_form.form_error = Some(
                "Settings storage is not available; the account only lives for this session."
                    .to_owned(),
            );
            return;
        };
        if let Err(err) = store.save_accounts(&self.accounts) {
            self.account_form.form_error = Some(format!("Unable to persist the account: {err}"));
            return;
        }
        self.account_form.form_error = None;
    }

    fn add_repo(&mut self) {
        let Some(repo) = RepoRef::parse(&self.repo_form.long_name, Host::Github) else {
            self.repo_form.form_error = Some("Repositories are added as owner/name.".to_owned());
            return;
        };
        if self
            .repos
            .iter()
            .any(|existing| existing.long_name() == repo.long_name())
        {
            self.repo_form.form_error =
                Some(format!("{} is already configured.", repo.long_name()));
            return;
        }

        self.repos.push(repo);
        if let Some(store) = &self.config_store
            && let Err(err) = store.save_repositories(&self.repos)
        {
            self.repo_form.form_error = Some(format!("Unable to persist repositories: {err}"));
            return;
        }
        self.repo_form = RepoForm::default();
    }

    fn remove_repo_at(&mut self, idx: usize) {
        if idx >= self.repos.len() {
            return;
        }
        self.repos.remove(idx);
        if let Some(store) = &self.config_store
            && let Err(err) = store.save_repositories(&self.repos)
        {
            self.error = Some(format!("Failed to persist repositories: {err}"));
        }
    }

    fn generate_report(&mut self) {
        let kind = self.active_range.store_kind();
        let selected: Vec<Activity> = self
            .coordinator
            .activities(kind)
            .iter()
            .filter(|activity| !self.deselected.contains(&activity.html_url))
            .cloned()
            .collect();
        let plans = self.coordinator.activities(StoreKind::Today).to_vec();

        let past = report::group_by_repo(&selected);
        let plans = report::group_by_repo(&plans);
        self.report_html = Some(report::render_report(&past, &plans));
    }

    fn render_side_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Configuration");
        ui.separator();

        if let Some(warning) = &self.storage_warning {
            ui.colored_label(ui.visuals().warn_fg_color, warning);
            ui.separator();
        }

        self.render_account_form(ui);
        ui.separator();
        self.render_repo_section(ui);
    }

    fn render_account_form(&mut self, ui: &mut egui::Ui) {
        ui.label("GitHub username");
        ui.text_edit_singleline(&mut self.account_form.username);

        ui.label("Personal access token (optional)");
        ui.add(
            egui::TextEdit::singleline(&mut self.account_form.token)
                .password(true)
                .hint_text("ghp_..."),
        );

        let save_enabled = !self.account_form.username.trim().is_empty();
        if ui
            .add_enabled(save_enabled, egui::Button::new("Save account"))
            .clicked()
        {
            self.save_account();
        }

        if let Some(error) = &self.account_form.form_error {
            ui.colored_label(ui.visuals().error_fg_color, error);
        }
    }

    fn render_repo_section(&mut self, ui: &mut egui::Ui) {
        ui.label("Repositories to report on");
        ui.add(
            egui::TextEdit::singleline(&mut self.repo_form.long_name).hint_text("owner/name"),
        );

        let add_enabled = !self.repo_form.long_name.trim().is_empty();
        if ui
            .add_enabled(add_enabled, egui::Button::new("Add repository"))
            .clicked()
        {
            self.add_repo();
        }

        if let Some(error) = &self.repo_form.form_error {
            ui.colored_label(ui.visuals().error_fg_color, error);
        }

        ui.separator();
        if self.repos.is_empty() {
            ui.weak("No repositories yet.");
        } else {
            let mut remove_idx = None;
            for (idx, repo) in self.repos.iter().enumerate() {
                ui.horizontal(|row| {
                    row.label(repo.long_name());
                    row.weak(repo.host.label());
                    if row.small_button("Remove").clicked() {
                        remove_idx = Some(idx);
                    }
                });
            }
            if let Some(idx) = remove_idx {
                self.remove_repo_at(idx);
            }
        }
    }

    fn render_dashboard(&mut self, ui: &mut egui::Ui) {
        let mut selected_range = self.active_range;
        let mut force_refresh = false;
        ui.horizontal(|row| {
            for range in [NamedRange::Today, NamedRange::Yesterday, NamedRange::Last7Days] {
                row.selectable_value(&mut selected_range, range, range.label());
            }
            row.with_layout(Layout::right_to_left(egui::Align::Center), |lane| {
                if lane.button("Refresh").clicked() {
                    force_refresh = true;
                }
            });
        });

        if selected_range != self.active_range {
            self.active_range = selected_range;
            self.report_html = None;
            self.notice = None;
            self.error = None;
            self.coordinator
                .refresh(selected_range, false, &self.accounts, &self.repos);
        }
        if force_refresh {
            self.report_html = None;
            self.notice = None;
            self.error = None;
            self.coordinator
                .refresh(self.active_range, true, &self.accounts, &self.repos);
        }

        self.render_status(ui);
        ui.separator();

        let activities = self.coordinator.activities(self.active_range.store_kind());
        let toggled = draw_activity_table(ui, activities, &self.deselected);
        for url in toggled {
            if !self.deselected.remove(&url) {
                self.deselected.insert(url);
            }
        }

        self.render_report_controls(ui);
    }

    fn render_status(&self, ui: &mut egui::Ui) {
        if let Some(error) = &self.error {
            ui.colored_label(ui.visuals().error_fg_color, error);
        }
        if let Some(notice) = &self.notice {
            ui.colored_label(ui.visuals().warn_fg_color, notice);
        }
        if self.coordinator.is_loading() {
            ui.label("Fetching latest activity...");
        }
    }

    fn render_report_controls(&mut self, ui: &mut egui::Ui) {
        ui.separator();
        let mut generate = false;
        ui.horizontal(|row| {
            let can_generate = self.coordinator.is_loaded(self.active_range.store_kind());
            if row
                .add_enabled(can_generate, egui::Button::new("Generate report"))
                .clicked()
            {
                generate = true;
            }
            if let Some(html) = &self.report_html {
                if row.button("Copy HTML").clicked() {
                    row.ctx().copy_text(html.clone());
                }
                if row.button("Copy as text").clicked() {
                    row.ctx().copy_text(report::strip_tags(html));
                }
            }
        });
        if generate {
            self.generate_report();
        }

        if let Some(html) = &self.report_html {
            egui::ScrollArea::vertical()
                .max_height(200.0)
                .show(ui, |area| {
                    let mut preview = html.as_str();
                    area.add(
                        egui::TextEdit::multiline(&mut preview)
                            .code_editor()
                            .desired_width(f32::INFINITY),
                    );
                });
        }
    }
}

impl App for StandupApp {
    fn update(&mut self, ctx: &Context, _frame: &mut Frame) {
        self.coordinator.poll();
        self.consume_store_events();

        egui::SidePanel::left("config_panel")
            .default_width(280.0)
            .show(ctx, |ui| self.render_side_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_dashboard(ui);
        });

        ctx.request_repaint_after(Duration::from_millis(500));
    }
}

// -----------------------------------------------------------------------------
// UI helpers
// -----------------------------------------------------------------------------

fn draw_activity_table(
    ui: &mut egui::Ui,
    activities: &[Activity],
    deselected: &HashSet<String>,
) -> Vec<String> {
    let mut toggled = Vec::new();
    if activities.is_empty() {
        ui.weak("No activity loaded for this range yet.");
        return toggled;
    }

    TableBuilder::new(ui)
        .striped(true)
        .column(Column::initial(24.0))
        .column(Column::initial(60.0))
        .column(Column::initial(110.0))
        .column(Column::initial(150.0).resizable(true))
        .column(Column::remainder())
        .column(Column::initial(130.0))
        .header(20.0, |mut header| {
            header.col(|_ui| {});
            header.col(|ui| {
                ui.strong("Type");
            });
            header.col(|ui| {
                ui.strong("Action");
            });
            header.col(|ui| {
                ui.strong("Repository");
            });
            header.col(|ui| {
                ui.strong("Subject");
            });
            header.col(|ui| {
                ui.strong("Created");
            });
        })
        .body(|mut body| {
            for activity in activities {
                body.row(24.0, |mut row| {
                    row.col(|ui| {
                        let mut selected = !deselected.contains(&activity.html_url);
                        if ui.checkbox(&mut selected, "").changed() {
                            toggled.push(activity.html_url.clone());
                        }
                    });
                    row.col(|ui| {
                        ui.label(activity.task_type.label());
                    });
                    row.col(|ui| {
                        ui.label(activity.action.label());
                    });
                    row.col(|ui| {
                        ui.label(activity.repo.long_name());
                    });
                    row.col(|ui| {
                        if activity.title.is_empty() {
                            ui.hyperlink_to("(title pending)", &activity.html_url);
                        } else {
                            ui.hyperlink_to(&activity.title, &activity.html_url);
                        }
                        ui.small(format!("by {}", activity.author));
                    });
                    row.col(|ui| {
                        ui.label(
                            activity
                                .created_at
                                .with_timezone(&Local)
                                .format("%Y-%m-%d %H:%M")
                                .to_string(),
                        );
                    });
                });
            }
        });
    toggled
}

// -----------------------------------------------------------------------------
// Supporting structs
// -----------------------------------------------------------------------------

#[derive(Default)]
struct AccountForm {
    username: String,
    token: String,
    form_error: Option<String>,
}

#[derive(Default)]
struct RepoForm {
    long_name: String,
    form_error: Option<String>,
}
