use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", style("✔").green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    println!("{} {}", style("✖").red(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", style("!").yellow(), msg);
}

/// Print info message (indented)
pub fn info(msg: &str) {
    println!("  {}", msg);
}

/// Print a header/title
pub fn header(msg: &str) {
    println!();
    println!("  {}", style(msg).bold());
    println!();
}

/// Yes/no prompt with a default answer
pub fn confirm(prompt: &str, default: bool) -> anyhow::Result<bool> {
    let answer = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(default)
        .interact()?;
    Ok(answer)
}

/// Spinner for a long-running phase
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✔"]),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}
