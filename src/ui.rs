use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::{io, time::Duration};
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};

use chatz::{ChannelState, ChatClient, Contact, Message};

// Export types needed by main module
pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

/// Something the user asked for, carried out by the main loop
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    Quit,
    Logout,
    RefreshContacts,
    SelectContact(String),
    Send(String),
}

enum Tab {
    Messages,
    Contacts,
}

// Transient line shown in place of the help line
struct Notice {
    text: String,
    is_error: bool,
    shown_at: chrono::DateTime<chrono::Utc>,
}

pub struct ChatUI {
    input: Input,
    active_tab: Tab,
    current_contact_index: usize,
    notice: Option<Notice>,
    show_help: bool,
}

impl ChatUI {
    pub fn new() -> Self {
        ChatUI {
            input: Input::default(),
            active_tab: Tab::Contacts,
            current_contact_index: 0,
            notice: None,
            show_help: false,
        }
    }

    pub fn notify(&mut self, text: impl Into<String>) {
        self.set_notice(text.into(), false);
    }

    pub fn notify_error(&mut self, text: impl Into<String>) {
        self.set_notice(text.into(), true);
    }

    fn set_notice(&mut self, text: String, is_error: bool) {
        debug!("UI notice: {}", text);
        self.notice = Some(Notice {
            text,
            is_error,
            shown_at: chrono::Utc::now(),
        });
    }

    // Drop the notice once it has been visible long enough
    pub fn clean_notice(&mut self, timeout_secs: i64) {
        if let Some(notice) = &self.notice {
            if (chrono::Utc::now() - notice.shown_at).num_seconds() > timeout_secs {
                self.notice = None;
            }
        }
    }

    /// Keep the highlighted row on the selected contact after the directory
    /// was replaced
    pub fn sync_selection(&mut self, client: &ChatClient) {
        let contacts = client.directory().contacts();
        if let Some(index) = client.conversation().selected().and_then(|id| client.directory().index_of(id)) {
            self.current_contact_index = index;
        } else if self.current_contact_index >= contacts.len() {
            self.current_contact_index = contacts.len().saturating_sub(1);
        }
    }

    pub fn handle_input(&mut self, client: &ChatClient) -> Result<Option<UiAction>> {
        if !event::poll(Duration::from_millis(10))? {
            return Ok(None);
        }
        let Event::Key(key) = event::read()? else {
            return Ok(None);
        };
        if key.kind != KeyEventKind::Press {
            return Ok(None);
        }

        // Any key closes the help popup
        if self.show_help {
            self.show_help = false;
            return Ok(None);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => return Ok(Some(UiAction::Quit)),
            KeyCode::Char('c') if ctrl => return Ok(Some(UiAction::Quit)),
            KeyCode::Char('l') if ctrl => return Ok(Some(UiAction::Logout)),
            KeyCode::Char('r') if ctrl => return Ok(Some(UiAction::RefreshContacts)),
            KeyCode::Char('h') if ctrl => self.show_help = true,
            KeyCode::Tab => {
                self.active_tab = match self.active_tab {
                    Tab::Messages => Tab::Contacts,
                    Tab::Contacts => Tab::Messages,
                };
            }
            KeyCode::Up | KeyCode::Down => {
                if let Tab::Contacts = self.active_tab {
                    let contacts = client.directory().contacts();
                    if !contacts.is_empty() {
                        let len = contacts.len();
                        self.current_contact_index = match key.code {
                            KeyCode::Up => (self.current_contact_index + len - 1) % len,
                            _ => (self.current_contact_index + 1) % len,
                        };
                    }
                }
            }
            KeyCode::Enter => match self.active_tab {
                Tab::Contacts => {
                    if let Some(contact) = client.directory().contacts().get(self.current_contact_index) {
                        self.active_tab = Tab::Messages;
                        if client.conversation().selected() != Some(contact.id.as_str()) {
                            return Ok(Some(UiAction::SelectContact(contact.id.clone())));
                        }
                    }
                }
                Tab::Messages => {
                    let content = self.input.value().trim().to_string();
                    if !content.is_empty() {
                        if client.conversation().selected().is_none() {
                            self.notify("Select a contact to start chatting");
                            return Ok(None);
                        }
                        // The draft is not kept; a failed send is only reported
                        self.input = Input::default();
                        return Ok(Some(UiAction::Send(content)));
                    }
                }
            },
            _ => {
                if let Tab::Messages = self.active_tab {
                    self.input.handle_event(&Event::Key(key));
                }
            }
        }
        Ok(None)
    }

    pub fn draw<B: Backend>(&self, frame: &mut Frame<B>, client: &ChatClient) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(25), // Contacts panel
                Constraint::Percentage(75), // Chat panel
            ])
            .split(size);

        let chat_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Contact header
                Constraint::Min(5),    // Messages area
                Constraint::Length(3), // Input box
                Constraint::Length(1), // Help line
            ])
            .split(chunks[1]);

        self.draw_contacts(frame, client, chunks[0]);
        draw_header(frame, client, chat_chunks[0]);
        draw_messages(frame, client, chat_chunks[1]);

        let input_block = Block::default()
            .title("Message")
            .borders(Borders::ALL)
            .border_style(match self.active_tab {
                Tab::Messages => Style::default().fg(Color::Yellow),
                _ => Style::default(),
            });
        let input_widget = Paragraph::new(self.input.value()).block(input_block);
        frame.render_widget(input_widget, chat_chunks[2]);

        let help = match &self.notice {
            Some(notice) => Paragraph::new(Line::from(Span::styled(
                notice.text.clone(),
                Style::default().fg(if notice.is_error { Color::Red } else { Color::Cyan }),
            ))),
            None => Paragraph::new(Line::from(Span::styled(
                "ESC quit | TAB switch | Enter select/send | Ctrl+R refresh | Ctrl+L logout | Ctrl+H help",
                Style::default().fg(Color::Gray),
            ))),
        };
        frame.render_widget(help, chat_chunks[3]);

        if let Tab::Messages = self.active_tab {
            frame.set_cursor(
                chat_chunks[2].x + self.input.visual_cursor() as u16 + 1,
                chat_chunks[2].y + 1,
            );
        }

        if self.show_help {
            draw_help_dialog(frame, size);
        }
    }

    fn draw_contacts<B: Backend>(&self, frame: &mut Frame<B>, client: &ChatClient, area: Rect) {
        let directory = client.directory();
        let selected = client.conversation().selected();

        let items: Vec<ListItem> = if directory.contacts().is_empty() {
            let placeholder = if directory.is_loaded() { "[No contacts found]" } else { "[Loading contacts...]" };
            vec![ListItem::new(placeholder).style(Style::default().fg(Color::Gray))]
        } else {
            directory
                .contacts()
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let cursor = if i == self.current_contact_index { "> " } else { "  " };
                    let presence = if c.is_online {
                        Span::styled("● ", Style::default().fg(Color::Green))
                    } else {
                        Span::styled("○ ", Style::default().fg(Color::DarkGray))
                    };
                    let mut name_style = Style::default().fg(avatar_color(c));
                    if selected == Some(c.id.as_str()) {
                        name_style = name_style.add_modifier(Modifier::BOLD);
                    }
                    let mut spans = vec![
                        Span::raw(cursor),
                        presence,
                        Span::styled(c.username.clone(), name_style),
                    ];
                    let unread = directory.unread(&c.id);
                    if unread > 0 {
                        spans.push(Span::styled(format!(" ({})", unread), Style::default().fg(Color::Yellow)));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect()
        };

        let title = match client.identity() {
            Some(me) => format!("Contacts - {}", me.username),
            None => "Contacts".to_string(),
        };
        let contacts_list = List::new(items).block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(match self.active_tab {
                    Tab::Contacts => Style::default().fg(Color::Yellow),
                    _ => Style::default(),
                }),
        );
        frame.render_widget(contacts_list, area);
    }
}

fn draw_header<B: Backend>(frame: &mut Frame<B>, client: &ChatClient, area: Rect) {
    let line = match client.selected_contact() {
        Some(contact) => Line::from(vec![
            Span::styled(
                format!("[{}] ", contact.initial()),
                Style::default().fg(avatar_color(contact)).add_modifier(Modifier::BOLD),
            ),
            Span::styled(contact.username.clone(), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  "),
            if contact.is_online {
                Span::styled("Online", Style::default().fg(Color::Green))
            } else {
                Span::styled("Offline", Style::default().fg(Color::DarkGray))
            },
        ]),
        None => Line::from(Span::raw("Chatz")),
    };
    frame.render_widget(Paragraph::new(line).block(Block::default().borders(Borders::ALL)), area);
}

fn draw_messages<B: Backend>(f: &mut Frame<B>, client: &ChatClient, area: Rect) {
    let connection_icon = match client.channel_state() {
        ChannelState::Connected => "● ",
        ChannelState::Connecting => "◌ ",
        ChannelState::Disconnected => "✕ ",
    };
    let title = format!("{}Messages", connection_icon);
    let block = Block::default().borders(Borders::ALL).title(title);

    let conversation = client.conversation();
    let Some(me) = conversation.me() else {
        f.render_widget(Paragraph::new("").block(block), area);
        return;
    };

    if conversation.selected().is_none() {
        let welcome = Paragraph::new(vec![
            Line::from(Span::styled("Welcome to Chatz!", Style::default().add_modifier(Modifier::BOLD))),
            Line::from("Select a contact to start chatting"),
        ])
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(block);
        f.render_widget(welcome, area);
        return;
    }

    if conversation.timeline().is_empty() {
        let text = if conversation.is_loading() { "Loading history..." } else { "No messages yet" };
        let empty = Paragraph::new(Span::styled(text, Style::default().fg(Color::Gray))).block(block);
        f.render_widget(empty, area);
        return;
    }

    let wrap_width = area.width.saturating_sub(2).max(1) as usize;
    let contact = client.selected_contact();

    let items: Vec<ListItem> = conversation
        .timeline()
        .iter()
        .flat_map(|m| message_lines(m, me, contact, wrap_width))
        .collect();

    // Select the last line so the list scrolls to the newest message
    let mut list_state = ListState::default();
    if !items.is_empty() {
        list_state.select(Some(items.len() - 1));
    }
    let messages_list = List::new(items).block(block).highlight_style(Style::default());
    f.render_stateful_widget(messages_list, area, &mut list_state);
}

fn message_lines(m: &Message, me: &str, contact: Option<&Contact>, width: usize) -> Vec<ListItem<'static>> {
    let time = m.timestamp.with_timezone(&chrono::Local).format("%H:%M").to_string();
    let is_own = m.sender_id == me;
    let (author, style) = if is_own {
        ("You".to_string(), Style::default().fg(Color::Magenta))
    } else {
        let name = contact
            .filter(|c| c.id == m.sender_id)
            .map(|c| c.username.clone())
            .unwrap_or_else(|| m.sender_id.clone());
        (name, Style::default().fg(contact.map(avatar_color).unwrap_or(Color::Reset)))
    };

    let full_content = format!("[{}] {}: {}", time, author, m.content);
    wrap(&full_content, width)
        .into_iter()
        .map(|line| ListItem::new(Text::from(line.into_owned())).style(style))
        .collect()
}

/// Terminal colour for a contact's `#rrggbb` avatar colour
fn avatar_color(contact: &Contact) -> Color {
    let hex = contact.avatar_color.trim_start_matches('#');
    if hex.len() == 6 {
        if let Ok(rgb) = u32::from_str_radix(hex, 16) {
            return Color::Rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8);
        }
    }
    Color::Reset
}

fn draw_help_dialog<B: Backend>(f: &mut Frame<B>, area: Rect) {
    let popup_width = 56.min(area.width.saturating_sub(4));
    let popup_height = 12.min(area.height.saturating_sub(4));
    let popup_area = Rect::new(
        (area.width - popup_width) / 2,
        (area.height - popup_height) / 2,
        popup_width,
        popup_height,
    );

    let lines = vec![
        Line::from("Tab        switch between contacts and composer"),
        Line::from("Up/Down    move in the contact list"),
        Line::from("Enter      open contact / send message"),
        Line::from("Ctrl+R     refresh contacts"),
        Line::from("Ctrl+L     log out"),
        Line::from("Ctrl+H     this help"),
        Line::from("Esc        quit"),
        Line::from(""),
        Line::from(Span::styled("Press any key to close", Style::default().fg(Color::Gray))),
    ];

    f.render_widget(Clear, popup_area);
    let help = Paragraph::new(lines).block(
        Block::default()
            .title("Help")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow)),
    );
    f.render_widget(help, popup_area);
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
