use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use tui_textarea::Input;

use crate::app::{AppState, InputMode};
use crate::record::Level;

/// Rows moved per wheel notch
const WHEEL_STEP: isize = 3;

/// Handle a mouse event
pub fn handle_mouse(state: &mut AppState, mouse: MouseEvent, width: u16) {
    match mouse.kind {
        MouseEventKind::ScrollUp => state.wheel(-WHEEL_STEP),
        MouseEventKind::ScrollDown => state.wheel(WHEEL_STEP),
        MouseEventKind::Down(MouseButton::Left) => state.mouse_down(mouse.column, width),
        _ => {}
    }
}

/// Handle a key event and update app state accordingly
pub fn handle_key(state: &mut AppState, key: KeyEvent, page_size: usize) {
    // Help overlay takes priority
    if state.show_help {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('?')) {
            state.show_help = false;
        }
        return;
    }

    match state.mode {
        InputMode::Normal => handle_normal_mode(state, key, page_size),
        InputMode::SearchEditing => handle_search_mode(state, key),
    }
}

fn handle_normal_mode(state: &mut AppState, key: KeyEvent, page_size: usize) {
    let page = page_size as isize;

    match key.code {
        KeyCode::Char('q') => {
            state.should_quit = true;
        }
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            state.should_quit = true;
        }

        KeyCode::Char('?') => {
            state.show_help = true;
        }

        // Severity threshold
        KeyCode::Char(c @ '1'..='4') => {
            let idx = c as usize - '1' as usize;
            state.set_threshold(Level::ALL[idx]);
        }

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => state.scroll(1),
        KeyCode::Char('k') | KeyCode::Up => state.scroll(-1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => state.scroll(page),
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => state.scroll(-page),
        KeyCode::PageDown => state.scroll(page),
        KeyCode::PageUp => state.scroll(-page),
        KeyCode::Char('g') | KeyCode::Home => state.go_to_top(),
        KeyCode::Char('G') | KeyCode::End => state.go_to_bottom(),

        KeyCode::Char('f') => state.toggle_follow(),
        KeyCode::Char('w') => state.toggle_line_wrap(),
        KeyCode::Char('x') => state.clear(),

        // Enter search mode
        KeyCode::Char('/') => {
            state.mode = InputMode::SearchEditing;
            state.search_textarea.select_all();
            state.search_textarea.cut();
        }
        KeyCode::Char('r') => state.toggle_regex_mode(),
        KeyCode::Esc => {
            if !state.session.search().is_empty() {
                state.clear_search();
            }
        }

        _ => {}
    }
}

fn handle_search_mode(state: &mut AppState, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => state.apply_search(),
        KeyCode::Esc => state.cancel_search(),
        KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            state.toggle_regex_mode();
        }
        _ => {
            // Forward all other keys to the textarea
            if state.search_textarea.input(Input::from(key)) {
                state.search_changed();
            }
        }
    }
}
