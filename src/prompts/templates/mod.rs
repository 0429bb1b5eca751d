//! Built-in template library for common business-content requests.

use super::PromptTemplate;

/// All built-in templates, ready for registration.
#[inline]
pub fn builtin() -> Vec<PromptTemplate> {
    vec![
        product_description(),
        product_categorization(),
        meta_tags_generator(),
        support_response(),
        faq_generator(),
        complaint_response(),
    ]
}

#[inline]
pub fn product_description() -> PromptTemplate {
    PromptTemplate {
        name: "product_description".to_string(),
        system_message: Some(
            "You are an expert e-commerce copywriter. You write persuasive, clear, \
             SEO-optimized descriptions that convert visitors into customers."
                .to_string(),
        ),
        template: "\
Create a complete e-commerce product description.

**Product information:**
- Name: {product_name}
- Category: {category}
- Features: {features}
- Price: {price}

**Target audience:** {target_audience}
**Desired tone:** {tone}

**Brand context:**
{context}

**Produce the following:**

1. **SEO title** (at most 60 characters)
2. **Short description** (at most 160 characters, suitable for a meta description)
3. **Detailed description** (200-300 words) with an opening hook, key benefits rather \
than bare features, and a closing call to action
4. **Benefit bullets** (3-5 concise points)
5. **SEO keywords** (5-7 relevant keywords)

Format the answer as clear, structured Markdown."
            .to_string(),
        variables: vec![
            "product_name".to_string(),
            "category".to_string(),
            "features".to_string(),
            "price".to_string(),
            "target_audience".to_string(),
            "tone".to_string(),
            "context".to_string(),
        ],
        temperature: 0.8,
        max_tokens: 1500,
    }
}

#[inline]
pub fn product_categorization() -> PromptTemplate {
    PromptTemplate {
        name: "product_categorization".to_string(),
        system_message: Some(
            "You are an expert in e-commerce taxonomies and product classification.".to_string(),
        ),
        template: "\
Analyze this product and assign it the correct category from the existing catalog.

**Product:**
- Name: {product_name}
- Description: {description}

**Available catalog categories:**
{categories}

**Catalog context:**
{context}

**Reply ONLY with valid JSON:**
{{
  \"main_category\": \"...\",
  \"subcategory\": \"...\",
  \"tags\": [\"...\", \"...\", \"...\"],
  \"confidence\": 0.95,
  \"reasoning\": \"one short sentence\"
}}"
        .to_string(),
        variables: vec![
            "product_name".to_string(),
            "description".to_string(),
            "categories".to_string(),
            "context".to_string(),
        ],
        temperature: 0.3,
        max_tokens: 500,
    }
}

#[inline]
pub fn meta_tags_generator() -> PromptTemplate {
    PromptTemplate {
        name: "meta_tags_generator".to_string(),
        system_message: Some("You are an SEO specialist for e-commerce.".to_string()),
        template: "\
Generate optimized meta tags for this product.

**Product:**
{product_name}

**Short summary:**
{summary}

**Priority keywords:**
{keywords}

Produce a meta title (at most 60 characters), a meta description (at most 160 \
characters), and an Open Graph title/description pair."
            .to_string(),
        variables: vec![
            "product_name".to_string(),
            "summary".to_string(),
            "keywords".to_string(),
        ],
        temperature: 0.4,
        max_tokens: 400,
    }
}

#[inline]
pub fn support_response() -> PromptTemplate {
    PromptTemplate {
        name: "support_response".to_string(),
        system_message: Some(
            "You are a professional, empathetic, solution-oriented support agent. \
             Customer satisfaction always comes first."
                .to_string(),
        ),
        template: "\
Answer this customer inquiry using the available information.

**Customer inquiry:**
{customer_query}

**Relevant knowledge-base information:**
{context}

**Applicable policies:**
{applicable_policies}

**Previous history with this customer (if any):**
{customer_history}

**Tone:** {tone}

Write a response that is empathetic about the customer's situation, resolves the \
question clearly and completely, includes concrete steps where they apply, offers \
alternatives when necessary, and closes by confirming whether further help is \
needed. At most 250 words."
            .to_string(),
        variables: vec![
            "customer_query".to_string(),
            "applicable_policies".to_string(),
            "customer_history".to_string(),
            "tone".to_string(),
            "context".to_string(),
        ],
        temperature: 0.6,
        max_tokens: 800,
    }
}

#[inline]
pub fn faq_generator() -> PromptTemplate {
    PromptTemplate {
        name: "faq_generator".to_string(),
        system_message: Some(
            "You are an expert at writing clear, useful FAQ entries based on real \
             customer inquiries."
                .to_string(),
        ),
        template: "\
Write an FAQ entry based on this recurring inquiry.

**Recurring inquiry:**
{recurring_question}

**Policy information:**
{context}

**Previous answers:**
{previous_answers}

Produce a reformulated question (clear and direct, phrased the way a customer would \
ask it) followed by a 150-200 word answer that leads with the direct answer and adds \
detail and a practical example afterwards."
            .to_string(),
        variables: vec![
            "recurring_question".to_string(),
            "previous_answers".to_string(),
            "context".to_string(),
        ],
        temperature: 0.5,
        max_tokens: 700,
    }
}

#[inline]
pub fn complaint_response() -> PromptTemplate {
    PromptTemplate {
        name: "complaint_response".to_string(),
        system_message: Some(
            "You are a senior support agent who de-escalates complaints while staying \
             factual and helpful."
                .to_string(),
        ),
        template: "\
Draft a response to this customer complaint.

**Complaint:**
{complaint}

**Previous history with this customer:**
{customer_history}

**Relevant policy context:**
{context}

**Tone:** {tone}

Acknowledge the problem without deflecting, explain what happens next with concrete \
steps and timelines, and offer a goodwill gesture only when the policy context \
supports one. At most 200 words."
            .to_string(),
        variables: vec![
            "complaint".to_string(),
            "customer_history".to_string(),
            "tone".to_string(),
            "context".to_string(),
        ],
        temperature: 0.6,
        max_tokens: 800,
    }
}
