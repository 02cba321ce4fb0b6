use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use rand::Rng as _;
use rand::seq::SliceRandom as _;

use crate::config::{MultiUserConfig, PromptSource, RunConfig};
use crate::state::UserSession;

/// One unit of work: a prompt owned by a simulated user. Immutable once
/// enqueued.
#[derive(Debug, Clone)]
pub struct Task {
    /// Owning user id; 0 in homogeneous mode.
    pub user_id: u32,
    pub index: usize,
    pub prompt: String,
}

/// Everything the coordinator needs to execute a run, materialized without
/// executing anything.
#[derive(Debug)]
pub(crate) struct RunPlan {
    pub model: String,
    pub concurrency: usize,
    pub delay_between_queries: Option<Duration>,
    pub tpm_monitoring: bool,
    pub tasks: VecDeque<Task>,
    pub user_sessions: BTreeMap<u32, UserSession>,
}

impl RunPlan {
    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }
}

/// Builds the task list for a validated config.
pub(crate) fn materialize(config: &RunConfig) -> RunPlan {
    match config {
        RunConfig::Homogeneous(cfg) => RunPlan {
            model: cfg.model.clone(),
            concurrency: cfg.concurrency,
            delay_between_queries: None,
            tpm_monitoring: false,
            tasks: (0..cfg.total_requests)
                .map(|index| Task {
                    user_id: 0,
                    index,
                    prompt: cfg.prompt.clone(),
                })
                .collect(),
            user_sessions: BTreeMap::new(),
        },
        RunConfig::MultiUser(cfg) => {
            let assignments = assign_prompts(cfg);

            let mut tasks = VecDeque::with_capacity(cfg.user_count as usize * cfg.queries_per_user);
            let mut user_sessions = BTreeMap::new();
            for (user_id, prompts) in &assignments {
                for (index, prompt) in prompts.iter().enumerate() {
                    tasks.push_back(Task {
                        user_id: *user_id,
                        index,
                        prompt: prompt.clone(),
                    });
                }
                user_sessions.insert(*user_id, UserSession::new(*user_id, prompts.clone()));
            }

            let delay = cfg.delay_between_queries;
            RunPlan {
                model: cfg.model.clone(),
                concurrency: cfg.concurrency,
                delay_between_queries: (!delay.is_zero()).then_some(delay),
                tpm_monitoring: cfg.tpm_monitoring,
                tasks,
                user_sessions,
            }
        }
    }
}

/// Assigns `queries_per_user` prompts to each user id in `1..=user_count`.
/// Assignments are independent per user and need not be disjoint.
pub fn assign_prompts(cfg: &MultiUserConfig) -> BTreeMap<u32, Vec<String>> {
    let mut out = BTreeMap::new();
    for user_id in 1..=cfg.user_count {
        let prompts = match &cfg.prompts {
            PromptSource::RandomPool => sample_prompts(&PROMPT_CATALOG, cfg.queries_per_user),
            PromptSource::Custom { prompts } => sample_prompts(prompts, cfg.queries_per_user),
        };
        out.insert(user_id, prompts);
    }
    out
}

/// Samples without replacement while the pool suffices, with replacement
/// once it is exhausted.
pub fn sample_prompts<S: AsRef<str>>(pool: &[S], count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    if count <= pool.len() {
        pool.choose_multiple(&mut rng, count)
            .map(|p| p.as_ref().to_string())
            .collect()
    } else {
        (0..count)
            .map(|_| pool[rng.gen_range(0..pool.len())].as_ref().to_string())
            .collect()
    }
}

/// Fixed 50-entry prompt catalog used by the random pool source.
pub const PROMPT_CATALOG: [&str; 50] = [
    // General Q&A
    "What is artificial intelligence?",
    "Explain the basic concepts of machine learning.",
    "Describe the main application areas of deep learning.",
    "What is natural language processing? Give an example.",
    "Explain how large language models work.",
    "What is a neural network and how does it operate?",
    "Explain the difference between supervised and unsupervised learning.",
    "What is reinforcement learning? Provide a practical example.",
    "Describe the main techniques used in computer vision.",
    "What is data science and which fields does it cover?",
    // Technology explainers
    "Explain cloud computing and its advantages.",
    "What is blockchain technology and how does it ensure security?",
    "Explain the concept and applications of the Internet of Things.",
    "What is 5G and how does it differ from 4G?",
    "Explain the difference between virtual reality and augmented reality.",
    "What is quantum computing and what are its potential applications?",
    "Describe the concept and advantages of edge computing.",
    "What is a microservice architecture and what are its benefits?",
    "Explain the ideas and practices behind DevOps.",
    "What is containerization and how does Docker work?",
    // Everyday advice
    "Recommend some ways to improve productivity at work.",
    "How can someone build good time-management habits?",
    "Share some advice for healthy eating.",
    "How can someone balance physical and mental health?",
    "Recommend some sports suitable for beginners.",
    "How can someone improve their sleep quality?",
    "Share some effective study techniques.",
    "How can someone build good interpersonal relationships?",
    "Recommend some ways to relieve stress.",
    "How can someone develop creativity and innovative thinking?",
    // General knowledge
    "Introduce the eight planets of the solar system.",
    "What is the greenhouse effect and how does it affect the Earth?",
    "Explain the process of photosynthesis.",
    "What is DNA and what role does it play in living organisms?",
    "Describe the water cycle.",
    "What is the theory of evolution and what did Darwin contribute?",
    "Explain gravity and Newton's contribution to understanding it.",
    "What is atomic structure? Describe electrons, protons, and neutrons.",
    "Introduce the organizing principles of the periodic table.",
    "What is the law of conservation of energy? Give an example.",
    // Creative thinking
    "If you could invent a new technology, what would it be and why?",
    "Imagine what the world will look like in 2050.",
    "As a city planner, how would you design an ideal city?",
    "Write a short story about friendship.",
    "If you could talk to any historical figure, who and why?",
    "Design an innovative solution to environmental pollution.",
    "If you could change one thing about the world, what would it be?",
    "Imagine a brand-new mode of transportation and describe it.",
    "As an educator, how would you reform the current education system?",
    "Describe what a perfect day looks like to you.",
];
