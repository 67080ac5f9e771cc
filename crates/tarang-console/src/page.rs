//! Headless model of the simulation page.
//!
//! Every element is optional so partial markup degrades instead of failing;
//! the helpers in `ui` and `bootstrap` silently skip what is missing.

use tarang_core::Severity;
use tokio::time::Instant;

pub const RUN_CONFIG_FORM_ID: &str = "run-config";
pub const DIMENSION_ID: &str = "dimension";
pub const NX_ID: &str = "nx";
pub const NY_ID: &str = "ny";
pub const NZ_ID: &str = "nz";
pub const INPUT_PATH_ID: &str = "input_path";
pub const OUTPUT_PATH_ID: &str = "output_path";

pub const CLASS_FADE_IN: &str = "fade-in";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextElement {
    pub class: String,
    pub text: String,
}

impl TextElement {
    pub fn new(class: &str, text: &str) -> Self {
        Self {
            class: class.to_string(),
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub disabled: bool,
}

impl Button {
    pub fn new(label: &str, disabled: bool) -> Self {
        Self {
            label: label.to_string(),
            disabled,
        }
    }
}

/// The `output-content` region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
    scroll_top: usize,
    block_appends: u64,
}

impl Transcript {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.scroll_top = 0;
    }

    /// Appends a whole batch as one write.
    pub fn append_block<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.lines.extend(lines);
        self.block_appends += 1;
    }

    pub fn scroll_to_end(&mut self) {
        self.scroll_top = self.lines.len();
    }

    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    pub fn block_appends(&self) -> u64 {
        self.block_appends
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressBar {
    pub width_percent: f64,
    pub aria_valuenow: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Select(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputField {
    pub id: String,
    pub label: String,
    pub kind: FieldKind,
    pub value: String,
    pub required: bool,
    pub disabled: bool,
    pub invalid: bool,
}

impl InputField {
    pub fn text(id: &str, label: &str, value: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: FieldKind::Text,
            value: value.to_string(),
            required: false,
            disabled: false,
            invalid: false,
        }
    }

    pub fn select(id: &str, label: &str, value: &str, options: &[&str]) -> Self {
        Self {
            kind: FieldKind::Select(options.iter().map(|opt| opt.to_string()).collect()),
            ..Self::text(id, label, value)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }

    pub fn is_select(&self) -> bool {
        matches!(self.kind, FieldKind::Select(_))
    }

    /// Moves a select to its neighbouring option, wrapping around.
    pub fn cycle_option(&mut self, forward: bool) -> bool {
        let FieldKind::Select(options) = &self.kind else {
            return false;
        };
        if options.is_empty() {
            return false;
        }
        let current = options.iter().position(|opt| *opt == self.value);
        let next = match (current, forward) {
            (Some(idx), true) => (idx + 1) % options.len(),
            (Some(idx), false) => (idx + options.len() - 1) % options.len(),
            (None, _) => 0,
        };
        self.value = options[next].clone();
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub id: String,
    pub fields: Vec<InputField>,
    pub validation_attached: bool,
    pub was_validated: bool,
}

impl Form {
    pub fn new(id: &str, fields: Vec<InputField>) -> Self {
        Self {
            id: id.to_string(),
            fields,
            validation_attached: false,
            was_validated: false,
        }
    }

    pub fn field(&self, id: &str) -> Option<&InputField> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn field_mut(&mut self, id: &str) -> Option<&mut InputField> {
        self.fields.iter_mut().find(|field| field.id == id)
    }

    /// Name/value pairs a browser would post: disabled controls are left out.
    pub fn submission_pairs(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter(|field| !field.disabled)
            .map(|field| (field.id.clone(), field.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub title: String,
    pub classes: Vec<String>,
}

impl Card {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            classes: vec!["card".to_string()],
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if !self.has_class(class) {
            self.classes.push(class.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    pub expires_at: Instant,
}

impl Notification {
    pub fn class(&self) -> String {
        format!(
            "alert {} alert-dismissible fade show position-fixed",
            self.severity.alert_class()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub connection_status: Option<TextElement>,
    pub status: Option<TextElement>,
    pub output: Option<Transcript>,
    pub start_btn: Option<Button>,
    pub stop_btn: Option<Button>,
    pub progress_bar: Option<ProgressBar>,
    pub cards: Vec<Card>,
    pub forms: Vec<Form>,
    pub dimension_listener: bool,
    notifications: Vec<Notification>,
    next_notification_id: u64,
}

impl Page {
    /// The full run page: status widgets, transcript, controls and the
    /// run-configuration form.
    pub fn simulation() -> Self {
        let run_config = Form::new(
            RUN_CONFIG_FORM_ID,
            vec![
                InputField::select("machine", "Machine", "Local", &["Local", "Remote"]),
                InputField::select("device", "Device", "CPU", &["CPU", "GPU"]),
                InputField::select(DIMENSION_ID, "Dimension", "3", &["1", "2", "3"]),
                InputField::select("kind", "Kind", "HYDRO", &["HYDRO", "MHD"]),
                InputField::text(NX_ID, "Nx", "64").required(),
                InputField::text(NY_ID, "Ny", "64").required(),
                InputField::text(NZ_ID, "Nz", "64").required(),
                InputField::text(INPUT_PATH_ID, "Input path", ""),
                InputField::text(OUTPUT_PATH_ID, "Output path", "").required(),
            ],
        );
        Self {
            connection_status: Some(TextElement::new("text-danger", "Disconnected")),
            status: Some(TextElement::new("status-idle", "Ready")),
            output: Some(Transcript::default()),
            start_btn: Some(Button::new("Start", false)),
            stop_btn: Some(Button::new("Stop", true)),
            progress_bar: Some(ProgressBar {
                text: "0%".to_string(),
                ..ProgressBar::default()
            }),
            cards: vec![Card::new("Run Configuration"), Card::new("Simulation Output")],
            forms: vec![run_config],
            ..Self::default()
        }
    }

    pub fn form(&self, id: &str) -> Option<&Form> {
        self.forms.iter().find(|form| form.id == id)
    }

    pub fn form_mut(&mut self, id: &str) -> Option<&mut Form> {
        self.forms.iter_mut().find(|form| form.id == id)
    }

    /// Looks a field up by id across every form on the page.
    pub fn field(&self, id: &str) -> Option<&InputField> {
        self.forms.iter().find_map(|form| form.field(id))
    }

    pub fn field_mut(&mut self, id: &str) -> Option<&mut InputField> {
        self.forms.iter_mut().find_map(|form| form.field_mut(id))
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub(crate) fn attach_notification(
        &mut self,
        message: String,
        severity: Severity,
        expires_at: Instant,
    ) -> u64 {
        self.next_notification_id += 1;
        let id = self.next_notification_id;
        self.notifications.push(Notification {
            id,
            message,
            severity,
            expires_at,
        });
        id
    }

    pub fn is_attached(&self, id: u64) -> bool {
        self.notifications.iter().any(|n| n.id == id)
    }

    pub fn remove_notification(&mut self, id: u64) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.id != id);
        before != self.notifications.len()
    }

    pub(crate) fn retain_notifications<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&Notification) -> bool,
    {
        let before = self.notifications.len();
        self.notifications.retain(keep);
        before - self.notifications.len()
    }
}
