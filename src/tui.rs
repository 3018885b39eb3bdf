use crate::{Field, FormValues, MarkerRole, PlotFrame, RunController, ADC_RANGE, TRACE_LEN};
use anyhow::Result;
use crossbeam_channel::{tick, Receiver};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use log::{error, info};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style, Stylize},
    symbols::{self, border},
    text::{Line, Span, Text},
    widgets::{Axis, Block, Chart, Dataset, GraphType, Paragraph, Widget},
    DefaultTerminal, Frame,
};
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Start,
    Stop,
    RunForEvents,
    Save,
}

impl Button {
    fn label(self) -> &'static str {
        match self {
            Button::Start => "Start",
            Button::Stop => "Stop",
            Button::RunForEvents => "Run for events",
            Button::Save => "Save",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item {
    Button(Button),
    Field(Field),
}

/// Focus order of the form, box by box.
const ITEMS: [Item; 13] = [
    Item::Button(Button::Start),
    Item::Button(Button::Stop),
    Item::Button(Button::RunForEvents),
    Item::Field(Field::MaxEvents),
    Item::Field(Field::Device),
    Item::Field(Field::TMin),
    Item::Field(Field::TMax),
    Item::Field(Field::Threshold),
    Item::Field(Field::NBins),
    Item::Field(Field::XMin),
    Item::Field(Field::XMax),
    Item::Field(Field::FileName),
    Item::Button(Button::Save),
];

/// Item ranges of the four form boxes.
const RUN_CONTROL: std::ops::Range<usize> = 0..5;
const PULSE_SELECTION: std::ops::Range<usize> = 5..8;
const ADC_SUM: std::ops::Range<usize> = 8..11;
const EXPORT: std::ops::Range<usize> = 11..13;

fn marker_color(role: MarkerRole) -> Color {
    match role {
        MarkerRole::LowerBound => Color::Blue,
        MarkerRole::UpperBound => Color::Red,
        MarkerRole::Threshold => Color::Green,
    }
}

/// Operator console: the form on the left, live plots on the right.
pub struct Console {
    controller: Arc<RunController>,
    frames: Receiver<PlotFrame>,
    frame: PlotFrame,
    focus: usize,
    status: String,
    exit: bool,
}

impl Console {
    pub fn new(controller: Arc<RunController>, frames: Receiver<PlotFrame>) -> Self {
        Self {
            controller,
            frames,
            frame: PlotFrame::default(),
            focus: 0,
            status: String::new(),
            exit: false,
        }
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let ticker = tick(Duration::from_millis(50));

        while !self.exit {
            let _ = ticker.recv();

            // newest frame wins
            while let Ok(frame) = self.frames.try_recv() {
                self.frame = frame;
            }

            self.handle_events()?;
            terminal.draw(|f| self.draw(f))?;
        }
        Ok(())
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> Result<()> {
        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key_event) if key_event.kind == KeyEventKind::Press => {
                    self.handle_key_event(key_event)
                }
                _ => {}
            };
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Esc => self.exit(),
            KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.exit()
            }
            KeyCode::Tab | KeyCode::Down => self.focus = (self.focus + 1) % ITEMS.len(),
            KeyCode::BackTab | KeyCode::Up => {
                self.focus = (self.focus + ITEMS.len() - 1) % ITEMS.len()
            }
            KeyCode::Enter => match ITEMS[self.focus] {
                Item::Button(button) => self.press(button),
                Item::Field(_) => self.focus = (self.focus + 1) % ITEMS.len(),
            },
            KeyCode::Char(c) => {
                if let Item::Field(field) = ITEMS[self.focus] {
                    self.controller.form().push_char(field, c);
                }
            }
            KeyCode::Backspace => {
                if let Item::Field(field) = ITEMS[self.focus] {
                    self.controller.form().pop_char(field);
                }
            }
            _ => {}
        }
    }

    fn press(&mut self, button: Button) {
        match button {
            Button::Start => {
                self.controller.start(0);
            }
            Button::Stop => self.controller.stop(),
            Button::RunForEvents => {
                let count = self.controller.form().snapshot().max_events;
                self.controller.start_for_events(&count);
            }
            Button::Save => {
                let path = self.controller.form().snapshot().file_name;
                self.status = match self.controller.save(path.trim()) {
                    Ok(()) => format!("Saved to {}", path.trim()),
                    Err(e) => {
                        error!("save failed: {e:#}");
                        format!("Save failed: {e:#}")
                    }
                };
            }
        }
    }

    fn exit(&mut self) {
        info!("console closed by operator");
        self.exit = true;
    }

    fn item_line(&self, values: &FormValues, index: usize) -> Line<'static> {
        let focused = index == self.focus;
        match ITEMS[index] {
            Item::Button(button) => {
                let label = Span::from(format!("[ {} ]", button.label())).bold();
                if focused {
                    Line::from(label.reversed())
                } else {
                    Line::from(label)
                }
            }
            Item::Field(field) => {
                let mut value = values.get(field).to_string();
                if focused {
                    value.push('_');
                }
                let value = if focused {
                    Span::from(value).yellow().reversed()
                } else {
                    Span::from(value).yellow()
                };
                Line::from(vec![format!("{:<18}", field.label()).into(), value])
            }
        }
    }

    fn render_form_box(
        &self,
        title: &str,
        values: &FormValues,
        items: std::ops::Range<usize>,
        area: Rect,
        buf: &mut Buffer,
    ) {
        let lines: Vec<Line> = items.map(|i| self.item_line(values, i)).collect();
        Paragraph::new(Text::from(lines))
            .block(Block::bordered().title(Line::from(title.to_string()).bold()))
            .render(area, buf);
    }

    fn render_pulse(&self, area: Rect, buf: &mut Buffer) {
        let markers = self.frame.markers();
        let mut datasets = vec![Dataset::default()
            .graph_type(GraphType::Line)
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::White))
            .data(&self.frame.trace)];
        for (role, points) in &markers {
            datasets.push(
                Dataset::default()
                    .graph_type(GraphType::Line)
                    .marker(symbols::Marker::Braille)
                    .style(Style::default().fg(marker_color(*role)))
                    .data(points),
            );
        }

        let summary = self.frame.trace_summary().join("  ");
        let block = Block::bordered()
            .title(Line::from(" Pulse shape ").bold())
            .title(Line::from(format!(" {summary} ")).right_aligned());

        Chart::new(datasets)
            .block(block)
            .x_axis(
                Axis::default()
                    .title("Time bin")
                    .bounds([0.0, TRACE_LEN])
                    .labels(["0", "500", "1000"]),
            )
            .y_axis(
                Axis::default()
                    .title("ADC value")
                    .bounds([0.0, ADC_RANGE])
                    .labels(["0", "128", "255"]),
            )
            .render(area, buf);
    }

    fn render_histogram(&self, area: Rect, buf: &mut Buffer) {
        let hist = &self.frame.histogram;
        let config = hist.config();
        let points = hist.points();
        let y_max = (hist.max_count() * 1.1).max(1.0);

        let dataset = Dataset::default()
            .graph_type(GraphType::Bar)
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::Cyan))
            .data(&points);

        let summary = self.frame.histogram_summary().join("  ");
        let block = Block::bordered()
            .title(Line::from(" ADC sum distribution ").bold())
            .title(Line::from(format!(" {summary} ")).right_aligned());

        Chart::new(vec![dataset])
            .block(block)
            .x_axis(
                Axis::default()
                    .title("ADC sum x1000")
                    .bounds([config.x_min, config.x_max])
                    .labels([
                        format!("{}", config.x_min),
                        format!("{}", config.x_max),
                    ]),
            )
            .y_axis(
                Axis::default()
                    .title("Counts")
                    .bounds([0.0, y_max])
                    .labels(["0".to_string(), format!("{y_max:.0}")]),
            )
            .render(area, buf);
    }
}

impl Widget for &Console {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = Line::from(" MSO5000 Pulse Analyser ".bold());
        let online = if self.controller.is_busy() {
            " online ".green().bold()
        } else {
            " idle ".dark_gray()
        };
        let instructions = Line::from(vec![
            " Move ".into(),
            "<Tab> ".blue().bold(),
            " Press ".into(),
            "<Enter> ".blue().bold(),
            " Quit ".into(),
            "<Esc> ".blue().bold(),
        ]);
        let block = Block::bordered()
            .title(title.centered())
            .title(Line::from(online).right_aligned())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);
        let inner = block.inner(area);
        block.render(area, buf);

        let [form, plots] =
            Layout::horizontal([Constraint::Length(40), Constraint::Min(20)]).areas(inner);
        let [run_box, pulse_box, adc_box, export_box, status] = Layout::vertical([
            Constraint::Length(7),
            Constraint::Length(5),
            Constraint::Length(5),
            Constraint::Length(4),
            Constraint::Min(1),
        ])
        .areas(form);

        let values = self.controller.form().snapshot();
        self.render_form_box(" Run Control ", &values, RUN_CONTROL, run_box, buf);
        self.render_form_box(" Pulse selection ", &values, PULSE_SELECTION, pulse_box, buf);
        self.render_form_box(" ADC sum distribution ", &values, ADC_SUM, adc_box, buf);
        self.render_form_box(" Export ", &values, EXPORT, export_box, buf);
        Paragraph::new(Line::from(Span::raw(self.status.clone()).italic())).render(status, buf);

        let [pulse, hist] =
            Layout::vertical([Constraint::Percentage(50), Constraint::Percentage(50)]).areas(plots);
        self.render_pulse(pulse, buf);
        self.render_histogram(hist, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::mock::MockEngine, Conf, FormValues, OperatorForm};
    use crossbeam_channel::unbounded;

    fn console() -> (Arc<MockEngine>, Console) {
        let engine = Arc::new(MockEngine::default());
        let form = Arc::new(OperatorForm::new(FormValues::from_config(
            &Conf::load(None).unwrap(),
        )));
        let (tx, rx) = unbounded();
        let controller = RunController::new(engine.clone(), form, tx, Duration::from_millis(20));
        (engine, Console::new(controller, rx))
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn focus_on(console: &mut Console, item: Item) {
        console.focus = ITEMS.iter().position(|&i| i == item).unwrap();
    }

    fn rendered(console: &Console) -> String {
        let area = Rect::new(0, 0, 140, 32);
        let mut buf = Buffer::empty(area);
        console.render(area, &mut buf);
        buf.content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn focus_wraps_around() {
        let (_, mut console) = console();
        console.handle_key_event(key(KeyCode::BackTab));
        assert_eq!(console.focus, ITEMS.len() - 1);
        console.handle_key_event(key(KeyCode::Tab));
        assert_eq!(console.focus, 0);
    }

    #[test]
    fn typing_edits_the_focused_field() {
        let (_, mut console) = console();
        focus_on(&mut console, Item::Field(Field::Threshold));
        console.handle_key_event(key(KeyCode::Backspace));
        for c in "42".chars() {
            console.handle_key_event(key(KeyCode::Char(c)));
        }
        assert_eq!(console.controller.form().snapshot().threshold, "42");

        // keys on a button do not edit anything
        focus_on(&mut console, Item::Button(Button::Stop));
        console.handle_key_event(key(KeyCode::Char('x')));
        assert_eq!(console.controller.form().snapshot().threshold, "42");
    }

    #[test]
    fn buttons_drive_the_controller() {
        let (engine, mut console) = console();
        focus_on(&mut console, Item::Field(Field::MaxEvents));
        console.handle_key_event(key(KeyCode::Backspace));
        console.handle_key_event(key(KeyCode::Char('7')));

        focus_on(&mut console, Item::Button(Button::RunForEvents));
        console.handle_key_event(key(KeyCode::Enter));
        assert!(console.controller.is_busy());
        assert_eq!(engine.max_events.load(std::sync::atomic::Ordering::SeqCst), 7);

        focus_on(&mut console, Item::Button(Button::Stop));
        console.handle_key_event(key(KeyCode::Enter));
        assert!(!console.controller.is_busy());
        console.controller.shutdown();
    }

    #[test]
    fn form_lines_come_from_one_snapshot() {
        let (_, console) = console();
        let mut values = console.controller.form().snapshot();
        values.device = "sim://50".into();
        let index = ITEMS
            .iter()
            .position(|&i| i == Item::Field(Field::Device))
            .unwrap();

        let line = console.item_line(&values, index);
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert!(text.contains("sim://50"));

        console.controller.form().set(Field::Device, "/dev/usbtmc3");
        assert!(rendered(&console).contains("/dev/usbtmc3"));
    }

    #[test]
    fn escape_quits() {
        let (_, mut console) = console();
        console.handle_key_event(key(KeyCode::Esc));
        assert!(console.exit);
    }

    #[test]
    fn renders_form_and_annotations() {
        let (_, console) = console();
        let screen = rendered(&console);
        assert!(screen.contains("Run Control"));
        assert!(screen.contains("Tmin (blue)"));
        assert!(screen.contains("Online: False"));
        assert!(screen.contains("Entries: 0"));
    }
}
