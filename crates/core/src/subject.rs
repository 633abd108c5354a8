use serde::Serialize;

/// A classroom subject and the teacher persona that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Icon token for the subject card.
    pub icon: &'static str,
    /// Accent color token.
    pub color: &'static str,
    pub background_color: &'static str,
    pub teacher_name: &'static str,
    pub teacher_title: &'static str,
    /// Spoken automatically when the classroom opens.
    pub introduction: &'static str,
    pub avatar_src: &'static str,
}

impl Subject {
    /// Monogram for the avatar: first letters of the first two words of the
    /// teacher's name.
    pub fn initials(&self) -> String {
        self.teacher_name
            .split_whitespace()
            .take(2)
            .filter_map(|word| word.chars().next())
            .collect()
    }
}

static SUBJECTS: [Subject; 5] = [
    Subject {
        id: "mathematics",
        name: "Mathematics",
        description: "Learn algebra, calculus, geometry and more with interactive guidance.",
        icon: "book-open",
        color: "text-math",
        background_color: "bg-math/10",
        teacher_name: "Dr. Alan Chen",
        teacher_title: "Mathematics Professor",
        introduction: "Hello! I'm Dr. Chen, your AI mathematics teacher. I specialize in making complex mathematical concepts easy to understand. Whether you're struggling with algebra, calculus, or geometry, I'm here to help you master these subjects with clear explanations and personalized guidance.",
        avatar_src: "/math-teacher.png",
    },
    Subject {
        id: "science",
        name: "Science",
        description: "Explore physics, chemistry, biology and scientific principles.",
        icon: "atom",
        color: "text-science",
        background_color: "bg-science/10",
        teacher_name: "Dr. Maria Rodriguez",
        teacher_title: "Science Educator",
        introduction: "Welcome! I'm Dr. Rodriguez, your AI science teacher. I'm passionate about physics, chemistry, and biology. I'll help you understand scientific concepts through clear explanations and interactive discussions. Let's explore the wonders of science together!",
        avatar_src: "/science-teacher.png",
    },
    Subject {
        id: "history",
        name: "History",
        description: "Discover world history, civilizations and key historical events.",
        icon: "clock",
        color: "text-history",
        background_color: "bg-history/10",
        teacher_name: "Prof. James Thompson",
        teacher_title: "History Scholar",
        introduction: "Greetings! I'm Professor Thompson, your AI history teacher. I specialize in world history, civilizations, and significant historical events. I'll help you understand the past through engaging narratives and critical analysis. History isn't just about memorizing dates—it's about understanding the story of humanity.",
        avatar_src: "/history-teacher.png",
    },
    Subject {
        id: "literature",
        name: "Literature",
        description: "Analyze classic and modern literature, poetry and writing techniques.",
        icon: "book-text",
        color: "text-literature",
        background_color: "bg-literature/10",
        teacher_name: "Dr. Emily Foster",
        teacher_title: "Literature Professor",
        introduction: "Hello there! I'm Dr. Foster, your AI literature teacher. I love exploring classic and modern literature, poetry, and writing techniques. I'll help you analyze texts, understand literary devices, and appreciate the beauty of written expression. Together, we'll delve into the world of stories and discover the power of words.",
        avatar_src: "/literature-teacher.png",
    },
    Subject {
        id: "coding",
        name: "Computer Science",
        description: "Learn programming fundamentals, algorithms and software development.",
        icon: "code",
        color: "text-coding",
        background_color: "bg-coding/10",
        teacher_name: "Prof. Alex Kim",
        teacher_title: "Computer Science Instructor",
        introduction: "Hi there! I'm Professor Kim, your AI computer science teacher. I specialize in programming languages, algorithms, and software development. Whether you're a beginner or looking to advance your coding skills, I'll guide you through concepts with practical examples and clear explanations. Let's build something amazing together!",
        avatar_src: "/coding-teacher.png",
    },
];

pub fn subjects() -> &'static [Subject] {
    &SUBJECTS
}

pub fn get_subject_by_id(id: &str) -> Option<&'static Subject> {
    SUBJECTS.iter().find(|subject| subject.id == id)
}

/// Case-insensitive match against subject names and descriptions.
/// An empty query returns the whole catalog.
pub fn search_subjects(query: &str) -> Vec<&'static Subject> {
    let query = query.trim().to_lowercase();
    SUBJECTS
        .iter()
        .filter(|subject| {
            subject.name.to_lowercase().contains(&query)
                || subject.description.to_lowercase().contains(&query)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_the_five_classrooms() {
        let ids: Vec<_> = subjects().iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            vec!["mathematics", "science", "history", "literature", "coding"]
        );
    }

    #[test]
    fn lookup_by_id() {
        let maths = get_subject_by_id("mathematics").unwrap();
        assert_eq!(maths.teacher_name, "Dr. Alan Chen");
        assert_eq!(maths.teacher_title, "Mathematics Professor");
        assert!(get_subject_by_id("alchemy").is_none());
        assert!(get_subject_by_id("").is_none());
    }

    #[test]
    fn search_matches_name_or_description() {
        let hits: Vec<_> = search_subjects("PROGRAMMING").iter().map(|s| s.id).collect();
        assert_eq!(hits, vec!["coding"]);

        let hits: Vec<_> = search_subjects("history").iter().map(|s| s.id).collect();
        assert_eq!(hits, vec!["history"]);

        assert_eq!(search_subjects("  ").len(), 5);
        assert!(search_subjects("quantum chromodynamics").is_empty());
    }

    #[test]
    fn initials_use_the_first_two_words() {
        let maths = get_subject_by_id("mathematics").unwrap();
        assert_eq!(maths.initials(), "DA");
        let coding = get_subject_by_id("coding").unwrap();
        assert_eq!(coding.initials(), "PA");
    }
}
