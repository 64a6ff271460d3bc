// tests/question_service_tests.rs

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use exam_bank::{
    error::{AppError, AppResult},
    models::{
        exam_topic::ExamTopic,
        question::{
            Choice, ChoiceInput, CreateQuestionRequest, NewChoice, NewQuestion, Question,
            QuestionUpdate, QuestionWithChoices, UpdateQuestionRequest,
        },
    },
    repositories::QuestionRepository,
    services::{QuestionService, quota::ensure_capacity},
    utils::crypto::FieldCipher,
};

const EXAM: i64 = 1;
const OTHER_EXAM: i64 = 2;
const ALICE: i64 = 100;
const BOB: i64 = 200;

#[derive(Default)]
struct Store {
    topics: HashMap<i64, ExamTopic>,
    questions: HashMap<i64, Question>,
    choices: HashMap<i64, Choice>,
    next_id: i64,
}

impl Store {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn count(&self, exam_topic_id: i64) -> i64 {
        self.questions
            .values()
            .filter(|q| q.exam_topic_id == exam_topic_id)
            .count() as i64
    }

    fn aggregate(&self, question_id: i64) -> Option<QuestionWithChoices> {
        let question = self.questions.get(&question_id)?.clone();
        let mut choices: Vec<Choice> = self
            .choices
            .values()
            .filter(|c| c.question_id == question_id)
            .cloned()
            .collect();
        choices.sort_by_key(|c| c.id);
        Some(QuestionWithChoices { question, choices })
    }

    fn insert_choice(&mut self, question_id: i64, choice: &NewChoice) {
        let id = self.next_id();
        self.choices.insert(
            id,
            Choice {
                id,
                question_id,
                choice_text: choice.choice_text.clone(),
                is_correct: choice.is_correct,
            },
        );
    }

    fn capacity(&self, exam_topic_id: i64) -> AppResult<()> {
        let topic = self
            .topics
            .get(&exam_topic_id)
            .ok_or_else(|| AppError::NotFound("ExamTopic not found.".to_string()))?;
        ensure_capacity(topic.total_questions, self.count(exam_topic_id))
    }
}

/// Whole-store mutex stands in for the exam topic row lock.
#[derive(Clone, Default)]
struct InMemoryQuestionRepository {
    store: Arc<Mutex<Store>>,
}

impl InMemoryQuestionRepository {
    async fn add_topic(&self, exam_id: i64, owner: i64, total_questions: i32) -> i64 {
        let mut store = self.store.lock().await;
        let id = store.next_id();
        store.topics.insert(
            id,
            ExamTopic {
                id,
                exam_id,
                topic_id: id,
                user_id: owner,
                total_questions,
                deadline: Utc::now() + Duration::days(7),
                created_at: Utc::now(),
                updated_at: None,
            },
        );
        id
    }

    async fn stored_content(&self, question_id: i64) -> String {
        self.store.lock().await.questions[&question_id].content.clone()
    }

    async fn stored_choice_text(&self, choice_id: i64) -> String {
        self.store.lock().await.choices[&choice_id].choice_text.clone()
    }

    async fn question_count(&self, exam_topic_id: i64) -> i64 {
        self.store.lock().await.count(exam_topic_id)
    }

    async fn choice_count(&self) -> usize {
        self.store.lock().await.choices.len()
    }
}

#[async_trait]
impl QuestionRepository for InMemoryQuestionRepository {
    async fn find_exam_topic(&self, exam_topic_id: i64) -> AppResult<Option<ExamTopic>> {
        Ok(self.store.lock().await.topics.get(&exam_topic_id).cloned())
    }

    async fn count_questions(&self, exam_topic_id: i64) -> AppResult<i64> {
        Ok(self.store.lock().await.count(exam_topic_id))
    }

    async fn list_questions(
        &self,
        exam_id: i64,
        exam_topic_id: i64,
    ) -> AppResult<Vec<QuestionWithChoices>> {
        let store = self.store.lock().await;
        let mut questions: Vec<&Question> = store
            .questions
            .values()
            .filter(|q| q.exam_id == exam_id && q.exam_topic_id == exam_topic_id)
            .collect();
        questions.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(questions
            .into_iter()
            .filter_map(|q| store.aggregate(q.id))
            .collect())
    }

    async fn find_question(
        &self,
        exam_id: i64,
        question_id: i64,
    ) -> AppResult<Option<QuestionWithChoices>> {
        let store = self.store.lock().await;
        Ok(store
            .aggregate(question_id)
            .filter(|agg| agg.question.exam_id == exam_id))
    }

    async fn insert_within_quota(&self, new: NewQuestion) -> AppResult<QuestionWithChoices> {
        let mut store = self.store.lock().await;
        store.capacity(new.exam_topic_id)?;

        // Widen the window between count and insert; the lock must still hold.
        tokio::task::yield_now().await;

        let id = store.next_id();
        store.questions.insert(
            id,
            Question {
                id,
                exam_id: new.exam_id,
                exam_topic_id: new.exam_topic_id,
                content: new.content,
                marks: new.marks,
                created_at: Utc::now(),
            },
        );
        for choice in &new.choices {
            store.insert_choice(id, choice);
        }
        store
            .aggregate(id)
            .ok_or_else(|| AppError::InternalServerError("insert lost".to_string()))
    }

    async fn apply_update(&self, update: QuestionUpdate) -> AppResult<QuestionWithChoices> {
        let mut store = self.store.lock().await;
        if update.moves_topic() {
            store.capacity(update.exam_topic_id)?;
        }
        if let Some(stale) = update.choices.changed.iter().find(|change| {
            store
                .choices
                .get(&change.id)
                .is_none_or(|c| c.question_id != update.question_id)
        }) {
            return Err(AppError::Conflict(format!(
                "Choice {} was changed concurrently; reload and retry.",
                stale.id
            )));
        }

        let question = store
            .questions
            .get_mut(&update.question_id)
            .filter(|q| q.exam_id == update.exam_id)
            .ok_or_else(|| AppError::NotFound("Question not found.".to_string()))?;
        question.exam_topic_id = update.exam_topic_id;
        question.marks = update.marks;
        if let Some(content) = &update.content {
            question.content = content.clone();
        }

        for id in &update.choices.deleted {
            store.choices.remove(id);
        }
        for change in &update.choices.changed {
            if let Some(choice) = store.choices.get_mut(&change.id) {
                if let Some(text) = &change.choice_text {
                    choice.choice_text = text.clone();
                }
                choice.is_correct = change.is_correct;
            }
        }
        for choice in &update.choices.inserted {
            store.insert_choice(update.question_id, choice);
        }

        store
            .aggregate(update.question_id)
            .ok_or_else(|| AppError::NotFound("Question not found.".to_string()))
    }

    async fn delete_question(&self, question_id: i64) -> AppResult<bool> {
        let mut store = self.store.lock().await;
        let removed = store.questions.remove(&question_id).is_some();
        store.choices.retain(|_, c| c.question_id != question_id);
        Ok(removed)
    }
}

fn setup() -> (QuestionService, InMemoryQuestionRepository, Arc<FieldCipher>) {
    let repo = InMemoryQuestionRepository::default();
    let cipher = Arc::new(FieldCipher::new("service-test-key").unwrap());
    let service = QuestionService::new(Arc::new(repo.clone()), cipher.clone());
    (service, repo, cipher)
}

fn choice(id: Option<i64>, text: &str, is_correct: bool) -> ChoiceInput {
    ChoiceInput {
        id,
        choice_text: text.to_string(),
        is_correct,
    }
}

fn create_request(exam_topic_id: i64, content: &str) -> CreateQuestionRequest {
    CreateQuestionRequest {
        exam_topic_id,
        content: content.to_string(),
        marks: 2,
        choices: vec![choice(None, "4", true), choice(None, "3", false)],
    }
}

#[tokio::test]
async fn create_encrypts_at_rest_and_returns_plaintext() {
    let (service, repo, cipher) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 5).await;

    let created = service
        .create(EXAM, create_request(topic, "2+2=?"), ALICE)
        .await
        .unwrap();

    assert_eq!(created.content, "2+2=?");
    assert_eq!(created.marks, 2);
    assert_eq!(created.exam_id, EXAM);
    assert_eq!(created.exam_topic_id, topic);
    let texts: Vec<&str> = created.choices.iter().map(|c| c.choice_text.as_str()).collect();
    assert_eq!(texts, vec!["4", "3"]);
    assert!(created.choices[0].is_correct);
    assert!(!created.choices[1].is_correct);

    let stored = repo.stored_content(created.id).await;
    assert_ne!(stored, "2+2=?");
    assert_eq!(
        cipher.decrypt(Some(stored.as_str())).unwrap().as_deref(),
        Some("2+2=?")
    );
    assert_ne!(repo.stored_choice_text(created.choices[0].id).await, "4");
}

#[tokio::test]
async fn quota_of_two_allows_exactly_two_creates() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 2).await;

    service.create(EXAM, create_request(topic, "Q1"), ALICE).await.unwrap();
    service.create(EXAM, create_request(topic, "Q2"), ALICE).await.unwrap();
    let third = service.create(EXAM, create_request(topic, "Q3"), ALICE).await;

    assert!(matches!(third, Err(AppError::QuotaExceeded(_))));
    assert_eq!(repo.question_count(topic).await, 2);
}

#[tokio::test]
async fn concurrent_creates_cannot_overfill_last_slot() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 1).await;

    let a = service.clone();
    let b = service.clone();
    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.create(EXAM, create_request(topic, "left"), ALICE).await }),
        tokio::spawn(async move { b.create(EXAM, create_request(topic, "right"), ALICE).await }),
    );
    let results = [first.unwrap(), second.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::QuotaExceeded(_))))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(rejected, 1);
    assert_eq!(repo.question_count(topic).await, 1);
}

#[tokio::test]
async fn list_returns_newest_first_with_counters() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 3).await;

    service.create(EXAM, create_request(topic, "first"), ALICE).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    service.create(EXAM, create_request(topic, "second"), ALICE).await.unwrap();

    let list = service.list(EXAM, topic, ALICE).await.unwrap();

    assert_eq!(list.total_questions, 3);
    assert_eq!(list.used_questions, 2);
    assert_eq!(list.remaining_questions, 1);
    let contents: Vec<&str> = list.questions.iter().map(|q| q.content.as_str()).collect();
    assert_eq!(contents, vec!["second", "first"]);
    assert_eq!(list.questions[0].choices[0].choice_text, "4");
}

#[tokio::test]
async fn other_instructor_is_forbidden_everywhere() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 5).await;
    let created = service
        .create(EXAM, create_request(topic, "secret"), ALICE)
        .await
        .unwrap();

    let create = service.create(EXAM, create_request(topic, "intruder"), BOB).await;
    assert!(matches!(create, Err(AppError::Forbidden(_))));

    let list = service.list(EXAM, topic, BOB).await;
    assert!(matches!(list, Err(AppError::Forbidden(_))));

    let get = service.get(EXAM, created.id, BOB).await;
    assert!(matches!(get, Err(AppError::Forbidden(_))));

    let update = service
        .update(
            EXAM,
            created.id,
            UpdateQuestionRequest {
                question_id: created.id,
                exam_topic_id: topic,
                content: "hijacked".to_string(),
                marks: 1,
                choices: vec![choice(None, "x", true)],
            },
            BOB,
        )
        .await;
    assert!(matches!(update, Err(AppError::Forbidden(_))));

    let delete = service.delete(EXAM, created.id, BOB).await;
    assert!(matches!(delete, Err(AppError::Forbidden(_))));

    let still_there = service.get(EXAM, created.id, ALICE).await.unwrap();
    assert_eq!(still_there.content, "secret");
}

#[tokio::test]
async fn get_under_different_exam_is_not_found() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 5).await;
    let created = service
        .create(EXAM, create_request(topic, "Q"), ALICE)
        .await
        .unwrap();

    let result = service.get(OTHER_EXAM, created.id, ALICE).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn create_against_topic_of_other_exam_is_not_found() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(OTHER_EXAM, ALICE, 5).await;

    let result = service.create(EXAM, create_request(topic, "Q"), ALICE).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn create_rejects_malformed_requests() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 5).await;

    let mut zero_marks = create_request(topic, "Q");
    zero_marks.marks = 0;
    assert!(matches!(
        service.create(EXAM, zero_marks, ALICE).await,
        Err(AppError::BadRequest(_))
    ));

    let mut no_choices = create_request(topic, "Q");
    no_choices.choices.clear();
    assert!(matches!(
        service.create(EXAM, no_choices, ALICE).await,
        Err(AppError::BadRequest(_))
    ));

    assert!(matches!(
        service.create(EXAM, create_request(topic, ""), ALICE).await,
        Err(AppError::BadRequest(_))
    ));
    assert_eq!(repo.question_count(topic).await, 0);
}

#[tokio::test]
async fn update_reconciles_choices() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 5).await;
    let created = service
        .create(
            EXAM,
            CreateQuestionRequest {
                exam_topic_id: topic,
                content: "Pick one".to_string(),
                marks: 1,
                choices: vec![choice(None, "A", true), choice(None, "B", false)],
            },
            ALICE,
        )
        .await
        .unwrap();
    let id_a = created.choices[0].id;
    let id_b = created.choices[1].id;
    let stored_a = repo.stored_choice_text(id_a).await;

    let updated = service
        .update(
            EXAM,
            created.id,
            UpdateQuestionRequest {
                question_id: created.id,
                exam_topic_id: topic,
                content: "Pick one".to_string(),
                marks: 1,
                choices: vec![choice(Some(id_a), "A", true), choice(None, "C", false)],
            },
            ALICE,
        )
        .await
        .unwrap();

    assert_eq!(updated.choices.len(), 2);
    assert_eq!(updated.choices[0].id, id_a);
    assert_eq!(updated.choices[0].choice_text, "A");
    assert_eq!(updated.choices[1].choice_text, "C");
    assert!(updated.choices.iter().all(|c| c.id != id_b));
    assert_eq!(repo.choice_count().await, 2);
    // Unchanged text keeps its stored ciphertext.
    assert_eq!(repo.stored_choice_text(id_a).await, stored_a);
}

#[tokio::test]
async fn update_only_reencrypts_changed_content() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 5).await;
    let created = service
        .create(EXAM, create_request(topic, "same"), ALICE)
        .await
        .unwrap();
    let before = repo.stored_content(created.id).await;

    let request = |content: &str| UpdateQuestionRequest {
        question_id: created.id,
        exam_topic_id: topic,
        content: content.to_string(),
        marks: 3,
        choices: created
            .choices
            .iter()
            .map(|c| choice(Some(c.id), &c.choice_text, !c.is_correct))
            .collect(),
    };

    let unchanged = service
        .update(EXAM, created.id, request("same"), ALICE)
        .await
        .unwrap();
    assert_eq!(unchanged.marks, 3);
    assert!(!unchanged.choices[0].is_correct);
    assert_eq!(repo.stored_content(created.id).await, before);

    let changed = service
        .update(EXAM, created.id, request("different"), ALICE)
        .await
        .unwrap();
    assert_eq!(changed.content, "different");
    assert_ne!(repo.stored_content(created.id).await, before);
}

#[tokio::test]
async fn update_with_mismatched_id_is_rejected() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 5).await;
    let created = service
        .create(EXAM, create_request(topic, "Q"), ALICE)
        .await
        .unwrap();

    let result = service
        .update(
            EXAM,
            created.id,
            UpdateQuestionRequest {
                question_id: created.id + 1,
                exam_topic_id: topic,
                content: "Q".to_string(),
                marks: 1,
                choices: vec![choice(None, "x", true)],
            },
            ALICE,
        )
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn update_can_move_between_owned_topics_with_room() {
    let (service, repo, _) = setup();
    let source = repo.add_topic(EXAM, ALICE, 5).await;
    let target = repo.add_topic(EXAM, ALICE, 1).await;
    let created = service
        .create(EXAM, create_request(source, "mover"), ALICE)
        .await
        .unwrap();

    let request = |exam_topic_id| UpdateQuestionRequest {
        question_id: created.id,
        exam_topic_id,
        content: "mover".to_string(),
        marks: 1,
        choices: vec![choice(None, "x", true)],
    };

    let moved = service
        .update(EXAM, created.id, request(target), ALICE)
        .await
        .unwrap();
    assert_eq!(moved.exam_topic_id, target);
    assert_eq!(repo.question_count(source).await, 0);
    assert_eq!(repo.question_count(target).await, 1);

    // Staying in a full topic is not quota-gated.
    service
        .update(EXAM, created.id, request(target), ALICE)
        .await
        .unwrap();
}

#[tokio::test]
async fn update_into_full_topic_is_quota_exceeded() {
    let (service, repo, _) = setup();
    let source = repo.add_topic(EXAM, ALICE, 5).await;
    let full = repo.add_topic(EXAM, ALICE, 1).await;
    service.create(EXAM, create_request(full, "occupant"), ALICE).await.unwrap();
    let created = service
        .create(EXAM, create_request(source, "mover"), ALICE)
        .await
        .unwrap();

    let result = service
        .update(
            EXAM,
            created.id,
            UpdateQuestionRequest {
                question_id: created.id,
                exam_topic_id: full,
                content: "mover".to_string(),
                marks: 1,
                choices: vec![choice(None, "x", true)],
            },
            ALICE,
        )
        .await;
    assert!(matches!(result, Err(AppError::QuotaExceeded(_))));
    assert_eq!(repo.question_count(source).await, 1);
}

#[tokio::test]
async fn update_into_foreign_topic_is_forbidden() {
    let (service, repo, _) = setup();
    let mine = repo.add_topic(EXAM, ALICE, 5).await;
    let theirs = repo.add_topic(EXAM, BOB, 5).await;
    let created = service
        .create(EXAM, create_request(mine, "Q"), ALICE)
        .await
        .unwrap();

    let result = service
        .update(
            EXAM,
            created.id,
            UpdateQuestionRequest {
                question_id: created.id,
                exam_topic_id: theirs,
                content: "Q".to_string(),
                marks: 1,
                choices: vec![choice(None, "x", true)],
            },
            ALICE,
        )
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn delete_removes_question_and_frees_quota() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 1).await;
    let created = service
        .create(EXAM, create_request(topic, "gone"), ALICE)
        .await
        .unwrap();

    service.delete(EXAM, created.id, ALICE).await.unwrap();

    assert!(matches!(
        service.get(EXAM, created.id, ALICE).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(repo.choice_count().await, 0);
    service
        .create(EXAM, create_request(topic, "replacement"), ALICE)
        .await
        .unwrap();
}

#[tokio::test]
async fn corrupted_ciphertext_surfaces_as_decoding_error() {
    let (service, repo, _) = setup();
    let topic = repo.add_topic(EXAM, ALICE, 5).await;
    let created = service
        .create(EXAM, create_request(topic, "Q"), ALICE)
        .await
        .unwrap();

    repo.store
        .lock()
        .await
        .questions
        .get_mut(&created.id)
        .unwrap()
        .content = "!!not-ciphertext!!".to_string();

    assert!(matches!(
        service.get(EXAM, created.id, ALICE).await,
        Err(AppError::DecodingError(_))
    ));
}
