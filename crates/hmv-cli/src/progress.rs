use indicatif::{ProgressBar, ProgressStyle};

/// Byte progress for a package download; a spinner until the size is known.
pub struct DownloadProgress {
    bar: ProgressBar,
    sized: bool,
}

impl DownloadProgress {
    pub fn new(name: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_prefix(name.to_string());
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{prefix:.bold.cyan} {spinner:.green} {bytes}")
        {
            bar.set_style(style);
        }
        Self { bar, sized: false }
    }

    pub fn update(&mut self, downloaded: u64, total: Option<u64>) {
        if let (Some(total), false) = (total, self.sized) {
            self.bar.set_length(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            {
                self.bar.set_style(style.progress_chars("█▓░"));
            }
            self.sized = true;
        }
        self.bar.set_position(downloaded);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
