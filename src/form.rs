use crate::{Conf, HistogramConfig, PulseWindow};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Editable text fields of the operator form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Device,
    MaxEvents,
    TMin,
    TMax,
    Threshold,
    NBins,
    XMin,
    XMax,
    FileName,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Field::Device => "Device",
            Field::MaxEvents => "Events",
            Field::TMin => "Tmin (blue)",
            Field::TMax => "Tmax (red)",
            Field::Threshold => "Threshold (green)",
            Field::NBins => "Num bins",
            Field::XMin => "ADC min",
            Field::XMax => "ADC max",
            Field::FileName => "File name",
        }
    }
}

/// Raw operator text, parsed only when a value is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct FormValues {
    pub device: String,
    pub max_events: String,
    pub t_min: String,
    pub t_max: String,
    pub threshold: String,
    pub n_bins: String,
    pub x_min: String,
    pub x_max: String,
    pub file_name: String,
}

impl FormValues {
    pub fn from_config(conf: &Conf) -> Self {
        Self {
            device: conf.run_settings.device.clone(),
            max_events: conf.run_settings.max_events.to_string(),
            t_min: conf.pulse_settings.t_min.to_string(),
            t_max: conf.pulse_settings.t_max.to_string(),
            threshold: conf.pulse_settings.threshold.to_string(),
            n_bins: conf.histogram_settings.n_bins.to_string(),
            x_min: conf.histogram_settings.x_min.to_string(),
            x_max: conf.histogram_settings.x_max.to_string(),
            file_name: conf.export_settings.file_name.clone(),
        }
    }

    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Device => &self.device,
            Field::MaxEvents => &self.max_events,
            Field::TMin => &self.t_min,
            Field::TMax => &self.t_max,
            Field::Threshold => &self.threshold,
            Field::NBins => &self.n_bins,
            Field::XMin => &self.x_min,
            Field::XMax => &self.x_max,
            Field::FileName => &self.file_name,
        }
    }

    pub fn get_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Device => &mut self.device,
            Field::MaxEvents => &mut self.max_events,
            Field::TMin => &mut self.t_min,
            Field::TMax => &mut self.t_max,
            Field::Threshold => &mut self.threshold,
            Field::NBins => &mut self.n_bins,
            Field::XMin => &mut self.x_min,
            Field::XMax => &mut self.x_max,
            Field::FileName => &mut self.file_name,
        }
    }

    pub fn pulse_window(&self) -> Option<PulseWindow> {
        PulseWindow::parse(&self.t_min, &self.t_max, &self.threshold)
    }

    pub fn histogram_config(&self) -> Option<HistogramConfig> {
        HistogramConfig::parse(&self.n_bins, &self.x_min, &self.x_max)
    }
}

/// Form values shared between the foreground form and the online updater.
#[derive(Debug)]
pub struct OperatorForm {
    values: Mutex<FormValues>,
}

impl OperatorForm {
    pub fn new(values: FormValues) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FormValues> {
        // The values are plain strings, a panicked writer cannot leave them inconsistent.
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> FormValues {
        self.lock().clone()
    }

    pub fn set(&self, field: Field, text: impl Into<String>) {
        *self.lock().get_mut(field) = text.into();
    }

    pub fn push_char(&self, field: Field, c: char) {
        self.lock().get_mut(field).push(c);
    }

    pub fn pop_char(&self, field: Field) {
        self.lock().get_mut(field).pop();
    }
}
