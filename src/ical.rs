use icalendar::{Calendar, Component, Event, EventLike};

use crate::models::ClassSummary;

#[derive(Clone, Default)]
pub struct ICalExporter {
    studio_name: String,
}

impl ICalExporter {
    pub fn new(studio_name: impl Into<String>) -> Self {
        Self {
            studio_name: studio_name.into(),
        }
    }

    pub fn generate(&self, classes: &[ClassSummary]) -> Vec<u8> {
        if classes.is_empty() {
            return Vec::new();
        }

        let mut calendar = Calendar::new();
        calendar.name(&format!("{} Timetable", self.studio_name));

        for item in classes {
            let class = &item.class;
            let mut event = Event::new();
            event.summary(&item.class_name);
            event.starts(class.starts_at());
            event.ends(class.ends_at());
            event.location(&format!("{} ({})", self.studio_name, item.equipment_name));
            event.description(&format!(
                "Instructor: {}\nFree spots: {}/{}\nWaiting: {}",
                item.instructor_name, item.free_spots, class.max_participants, item.waiting
            ));
            event.uid(&format!("{}@studio-booking", class.id));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}
